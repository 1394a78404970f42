//! Write-only JSON dumps of what a run indexed. Nothing reads them back.

use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::index::Overlap;
use crate::session::IndexedPatch;
use crate::util::DataPath;

pub const PATCHES_DUMP: &str = "patches.json";
pub const OVERLAPS_DUMP: &str = "overlaps.json";
pub const ALL_FILES_DUMP: &str = "all-files.json";

#[derive(Serialize)]
struct PatchDump<'a> {
    archive: &'a Path,
    files: Vec<&'a DataPath>,
    conflicts: &'a BTreeSet<DataPath>,
}

/// Failures are logged and otherwise ignored.
pub fn write_dumps(work_dir: &Path, patches: &[IndexedPatch], overlaps: &[Overlap]) {
    let per_patch: BTreeMap<&PathBuf, PatchDump<'_>> = patches
        .iter()
        .map(|p| {
            (
                &p.archive.work_dir,
                PatchDump {
                    archive: &p.archive.archive,
                    files: p.files.iter().map(|f| &f.path).collect(),
                    conflicts: &p.conflicts,
                },
            )
        })
        .collect();
    let all_files: Vec<&DataPath> = patches
        .iter()
        .flat_map(|p| p.files.iter().map(|f| &f.path))
        .collect();

    write_json(&work_dir.join(PATCHES_DUMP), &per_patch);
    write_json(&work_dir.join(OVERLAPS_DUMP), &overlaps);
    write_json(&work_dir.join(ALL_FILES_DUMP), &all_files);
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) {
    let result = serde_json::to_string_pretty(value)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(path, json));
    match result {
        Ok(()) => debug!("Wrote {}", path.display()),
        Err(e) => warn!("Could not write diagnostic dump {}: {e}", path.display()),
    }
}
