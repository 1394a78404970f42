//! One run of the tool: the state machine and everything scoped to it.

use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::apply::{self, ApplySummary};
use crate::diagnostics;
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::index::{self, Overlap};
use crate::manifest::{self, PatchArchive};
use crate::resource_id::{IdGrammar, ResourceIdResolver};
use crate::restore::{self, RestoreReport};
use crate::settings::Config;
use crate::snapshot::{OriginalSnapshot, SNAPSHOT_FILE_NAME};
use crate::util::{DataFile, DataPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ManifestIndexed,
    Restored,
    Applying,
    Done,
}

impl RunState {
    pub fn name(self) -> &'static str {
        match self {
            RunState::Init => "Init",
            RunState::ManifestIndexed => "ManifestIndexed",
            RunState::Restored => "Restored",
            RunState::Applying => "Applying",
            RunState::Done => "Done",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An extracted patch with its file list and the base files it would overwrite.
#[derive(Debug, Clone)]
pub struct IndexedPatch {
    pub archive: PatchArchive,
    pub files: Vec<DataFile>,
    pub conflicts: BTreeSet<DataPath>,
}

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub patches_applied: usize,
    pub skipped_archives: usize,
    pub files: ApplySummary,
    pub total_conflicts: usize,
    pub remaps: BTreeMap<u32, u32>,
    pub restore: Option<RestoreReport>,
}

pub struct Session {
    config: Config,
    extractor: Extractor,
    state: RunState,
    snapshot: Option<OriginalSnapshot>,
    patches: Vec<IndexedPatch>,
    overlaps: Vec<Overlap>,
    skipped_archives: Vec<PathBuf>,
    restore_report: Option<RestoreReport>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let extractor = Extractor::new(config.extractor.clone(), config.extractor_args.clone());
        Self {
            config,
            extractor,
            state: RunState::Init,
            snapshot: None,
            patches: Vec::new(),
            overlaps: Vec::new(),
            skipped_archives: Vec::new(),
            restore_report: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn patches(&self) -> &[IndexedPatch] {
        &self.patches
    }

    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }

    pub fn skipped_archives(&self) -> &[PathBuf] {
        &self.skipped_archives
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.config.work_dir.join(SNAPSHOT_FILE_NAME)
    }

    fn skip_dirs(&self) -> Vec<PathBuf> {
        vec![self.config.work_dir.clone()]
    }

    fn require(&self, action: &'static str, allowed: &[RunState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                action,
                state: self.state.name(),
            })
        }
    }

    fn pristine(&self, action: &'static str) -> Result<&OriginalSnapshot> {
        self.snapshot.as_ref().ok_or(Error::InvalidTransition {
            action,
            state: self.state.name(),
        })
    }

    /// Resolve the manifest, make sure the original snapshot exists, extract
    /// every archive that is not extracted yet and index the results.
    ///
    /// Missing archives and failed extractions are skipped with a warning.
    pub async fn index(&mut self) -> Result<()> {
        self.require("index", &[RunState::Init])?;
        let skip = self.skip_dirs();

        let manifest = manifest::resolve(&self.config.manifest, &self.config.work_dir)?;
        info!(
            "Manifest {} lists {} archive(s)",
            manifest.path.display(),
            manifest.entries.len()
        );

        let snapshot = OriginalSnapshot::load_or_capture(
            &self.snapshot_file(),
            &self.config.game_dir,
            &self.config.anchor,
            &skip,
        )?;

        if snapshot.is_empty() {
            warn!(
                "No data files under {}; nothing is protected by backups",
                self.config.game_dir.join(&self.config.anchor).display()
            );
        }

        let base = index::list_data_files(&self.config.game_dir, &self.config.anchor, &skip)?;
        info!("Indexed {} base file(s)", base.len());

        for archive in manifest.entries {
            let staged = match archive.check(&self.config.archive_ext) {
                Ok(()) => self.extractor.ensure_extracted(&archive).await,
                Err(e) => Err(e),
            };
            match staged {
                Ok(Some(log)) => debug!(
                    "Extracted {} ({} line(s) of output)",
                    archive.name(),
                    log.stdout.len() + log.stderr.len()
                ),
                Ok(None) => debug!("{} is already extracted", archive.work_dir.display()),
                Err(e) if e.is_local() => {
                    warn!("Index: skipping - {e}");
                    self.skipped_archives.push(archive.archive);
                    continue;
                }
                Err(e) => return Err(e),
            }

            let files = index::list_data_files(&archive.work_dir, &self.config.anchor, &[])?;
            let conflicts =
                index::intersect([base.iter().map(path_of), files.iter().map(path_of)]);
            info!(
                "Patch {}: {} file(s), {} conflict(s) with the install",
                archive.name(),
                files.len(),
                conflicts.len()
            );
            self.patches.push(IndexedPatch {
                archive,
                files,
                conflicts,
            });
        }

        let named: Vec<(String, Vec<DataPath>)> = self
            .patches
            .iter()
            .map(|p| (p.archive.name(), p.files.iter().map(|f| f.path.clone()).collect()))
            .collect();
        self.overlaps = index::pairwise_overlaps(&named);
        diagnostics::write_dumps(&self.config.work_dir, &self.patches, &self.overlaps);

        self.snapshot = Some(snapshot);
        self.state = RunState::ManifestIndexed;
        Ok(())
    }

    /// Roll the install back to the original snapshot, then re-capture the
    /// snapshot from the restored install.
    pub fn restore(&mut self) -> Result<&RestoreReport> {
        self.require("restore", &[RunState::ManifestIndexed])?;
        let skip = self.skip_dirs();
        let snapshot_file = self.snapshot_file();

        let report = restore::restore(
            &self.config.game_dir,
            &self.config.anchor,
            &skip,
            self.pristine("restore")?,
            &snapshot_file,
        )?;

        let recaptured =
            OriginalSnapshot::capture(&self.config.game_dir, &self.config.anchor, &skip)?;
        recaptured.save(&snapshot_file)?;
        self.snapshot = Some(recaptured);
        self.state = RunState::Restored;
        Ok(&*self.restore_report.insert(report))
    }

    /// Apply every indexed patch in manifest order.
    pub fn apply(&mut self) -> Result<RunSummary> {
        self.require("apply", &[RunState::ManifestIndexed, RunState::Restored])?;
        self.pristine("apply")?;
        self.state = RunState::Applying;
        let snapshot = self.pristine("apply")?;
        let mut resolver = ResourceIdResolver::new(
            IdGrammar::new(&self.config.id_prefix),
            snapshot.paths(),
        );
        let mut summary = RunSummary {
            skipped_archives: self.skipped_archives.len(),
            restore: self.restore_report.clone(),
            ..RunSummary::default()
        };

        let count = self.patches.len();
        for (i, patch) in self.patches.iter().enumerate() {
            info!("Applying patch {}/{count}: {}", i + 1, patch.archive.name());
            let applied = apply::apply_patch(
                &self.config.game_dir,
                &patch.archive.work_dir,
                &patch.files,
                snapshot,
                &mut resolver,
            )?;
            summary.files.absorb(&applied);
            summary.total_conflicts += patch.conflicts.len();
            summary.patches_applied += 1;
        }
        summary.remaps = resolver.remaps().clone();

        self.state = RunState::Done;
        Ok(summary)
    }
}

fn path_of(file: &DataFile) -> &DataPath {
    &file.path
}
