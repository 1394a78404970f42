//! Read-only audit of the backup chains left in an install.

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::backup::{self, BackupIndex, INDEX_FILE_NAME};
use crate::digest;
use crate::error::{Error, Result};
use crate::snapshot::{OriginalSnapshot, SNAPSHOT_FILE_NAME};
use crate::util::{self, DataPath};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub indexes: usize,
    pub chains: usize,
    pub backups: usize,
    pub problems: Vec<Problem>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, path: impl Into<PathBuf>, message: impl Into<String>) {
        self.problems.push(Problem {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Check every backup index under `game_dir`: sequences run 0..k-1, each
/// recorded backup exists, no backup is unrecorded, and `backup0` of an
/// original file still matches its pristine digest in the snapshot. Files that
/// a patch introduced have no pristine digest, so their chains are only
/// checked for shape.
///
/// Corrupt indexes are reported as problems. Only I/O failures abort.
pub fn verify(game_dir: &Path, work_dir: &Path, anchor: &str) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    let snapshot_file = work_dir.join(SNAPSHOT_FILE_NAME);
    let snapshot = match OriginalSnapshot::load(&snapshot_file) {
        Ok(Some(snapshot)) => Some(snapshot),
        Ok(None) => {
            report.problem(&snapshot_file, "no original snapshot; backup0 digests not checked");
            None
        }
        Err(e @ Error::StateCorruption { .. }) => {
            report.problem(&snapshot_file, e.to_string());
            None
        }
        Err(e) => return Err(e),
    };

    let mut on_disk: BTreeMap<DataPath, (PathBuf, BTreeSet<u32>)> = BTreeMap::new();
    let mut indexes = Vec::new();
    for file in util::walk_data_files(game_dir, anchor, &[work_dir.to_path_buf()])? {
        let Some((dir_rel, name)) = file.path.as_str().rsplit_once('/') else {
            continue;
        };
        if name.eq_ignore_ascii_case(INDEX_FILE_NAME) {
            indexes.push((dir_rel.to_string(), file.full_path));
        } else if let Some((stem, sequence)) = backup::parse_backup_name(name) {
            on_disk
                .entry(DataPath::new(&format!("{dir_rel}/{stem}")))
                .or_insert_with(|| (file.full_path.with_file_name(stem), BTreeSet::new()))
                .1
                .insert(sequence);
        }
    }

    for (dir_rel, index_path) in indexes {
        let Some(dir) = index_path.parent() else {
            continue;
        };
        report.indexes += 1;
        let index: BackupIndex = match backup::index_store(dir).load() {
            Ok(index) => index,
            Err(e @ Error::StateCorruption { .. }) => {
                report.problem(&index_path, e.to_string());
                continue;
            }
            Err(e) => return Err(e),
        };

        for (name, records) in index {
            report.chains += 1;
            let live = DataPath::new(&format!("{dir_rel}/{name}"));
            let target = dir.join(&name);
            let recorded: Vec<u32> = records.iter().map(|r| r.sequence).collect();
            let expected: Vec<u32> = (0..recorded.len() as u32).collect();
            if recorded != expected {
                report.problem(
                    &target,
                    format!("backup sequences {recorded:?} do not run contiguously from 0"),
                );
            }

            for &sequence in &recorded {
                if backup::backup_path(&target, sequence).is_file() {
                    report.backups += 1;
                } else {
                    report.problem(&target, format!("backup {sequence} is recorded but missing"));
                }
            }

            let present = on_disk.remove(&live).map(|(_, s)| s).unwrap_or_default();
            for sequence in present.iter().filter(|s| !recorded.contains(s)) {
                report.problem(&target, format!("backup {sequence} is not recorded in the index"));
            }

            let backup0 = backup::backup_path(&target, 0);
            if let (Some(snapshot), true) = (&snapshot, backup0.is_file()) {
                match snapshot.digest_of(&live) {
                    // introduced by an earlier patch; restore deletes it outright
                    None => debug!("{live} has no original content to compare"),
                    Some(pristine) if digest::digest(&backup0)? != *pristine => {
                        report.problem(&target, "backup0 no longer matches the original content")
                    }
                    Some(_) => debug!("Verified {live}"),
                }
            }
        }
    }

    for (_, (target, sequences)) in on_disk {
        report.problem(
            target,
            format!("backups {sequences:?} exist without an index entry"),
        );
    }

    info!(
        "Verified {} index(es), {} chain(s), {} backup(s): {} problem(s)",
        report.indexes,
        report.chains,
        report.backups,
        report.problems.len()
    );
    Ok(report)
}
