//! Roll the install back to its original snapshot.

use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::backup;
use crate::error::{Error, IoContext, Result};
use crate::index;
use crate::snapshot::OriginalSnapshot;
use crate::util;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub missing_live: usize,
    pub state_files_removed: usize,
    pub backups_removed: usize,
    pub introduced_removed: usize,
}

/// Reinstate every `backup0`, drop all backup state, then delete every data
/// file the snapshot does not know about.
///
/// `snapshot_file` is deleted as well; the caller re-captures it from the
/// restored install.
pub fn restore(
    game_dir: &Path,
    anchor: &str,
    skip: &[PathBuf],
    snapshot: &OriginalSnapshot,
    snapshot_file: &Path,
) -> Result<RestoreReport> {
    let mut report = RestoreReport::default();
    let artifacts: Vec<PathBuf> = util::walk_data_files(game_dir, anchor, skip)?
        .into_iter()
        .filter(|f| backup::is_tool_artifact(f.path.file_name()))
        .map(|f| f.full_path)
        .collect();

    // 1. backup0 is the pristine content
    for path in &artifacts {
        let Some((live, 0)) = backup::split_backup_path(path) else {
            continue;
        };
        match fs::remove_file(&live) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Restore: patched file {} was missing", live.display());
                report.missing_live += 1;
            }
            Err(e) => return Err(Error::io(&live, e)),
        }
        fs::rename(path, &live).at(path)?;
        debug!("Restored {}", live.display());
        report.restored += 1;
    }

    // 2. backup indexes and the snapshot describe a history that no longer exists
    for path in &artifacts {
        if backup::split_backup_path(path).is_none() && remove_if_present(path)? {
            report.state_files_removed += 1;
        }
    }
    if remove_if_present(snapshot_file)? {
        report.state_files_removed += 1;
    }

    // 3. later backups are obsolete once backup0 is back
    for path in &artifacts {
        if let Some((_, sequence)) = backup::split_backup_path(path) {
            if sequence > 0 && remove_if_present(path)? {
                report.backups_removed += 1;
            }
        }
    }

    // 4. files introduced by patches, including remapped destinations
    for file in index::list_data_files(game_dir, anchor, skip)? {
        if snapshot.contains(&file.path) {
            continue;
        }
        remove_if_present(&file.full_path)?;
        prune_empty_parents(&file.full_path, anchor);
        debug!("Removed introduced file {}", file.path);
        report.introduced_removed += 1;
    }

    info!(
        "Restore complete: {} restored, {} backups and {} state files removed, {} introduced files deleted",
        report.restored, report.backups_removed, report.state_files_removed, report.introduced_removed
    );
    Ok(report)
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Restore: expected {} but it was already gone", path.display());
            Ok(false)
        }
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove directories emptied by a deletion, stopping at the anchor directory.
fn prune_empty_parents(file: &Path, anchor: &str) {
    for dir in file.ancestors().skip(1) {
        let at_anchor = dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(anchor));
        if at_anchor || fs::remove_dir(dir).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::list_data_files;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn live_set(root: &Path) -> BTreeSet<String> {
        list_data_files(root, "data", &[])
            .unwrap()
            .into_iter()
            .map(|f| f.path.key().to_string())
            .collect()
    }

    #[test]
    fn restores_pristine_file_set_and_content() {
        let game = tempdir().unwrap();
        let work = tempdir().unwrap();
        let root = game.path();
        let car = root.join("data/cars/car_5");
        fs::create_dir_all(&car).unwrap();
        fs::write(car.join("body.dds"), b"pristine").unwrap();
        fs::write(root.join("data/menu.bed"), b"menu").unwrap();

        let snapshot = OriginalSnapshot::capture(root, "data", &[]).unwrap();
        let snap_file = work.path().join("pristine.snapshot");
        snapshot.save(&snap_file).unwrap();

        // two overwrites, one new file, one remapped slot
        backup::snapshot(&car.join("body.dds"), Path::new("a")).unwrap();
        fs::write(car.join("body.dds"), b"patch a").unwrap();
        backup::snapshot(&car.join("body.dds"), Path::new("b")).unwrap();
        fs::write(car.join("body.dds"), b"patch b").unwrap();
        fs::write(car.join("wheel.dds"), b"new").unwrap();
        fs::create_dir_all(root.join("data/cars/car_6")).unwrap();
        fs::write(root.join("data/cars/car_6/wheel.dds"), b"moved").unwrap();

        let report = restore(root, "data", &[], &snapshot, &snap_file).unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.backups_removed, 1);
        assert_eq!(report.introduced_removed, 2);
        assert_eq!(fs::read(car.join("body.dds")).unwrap(), b"pristine");
        assert!(!car.join("backup-index.json").exists());
        assert!(!snap_file.exists());
        assert!(!root.join("data/cars/car_6").exists());

        let expected: BTreeSet<String> = snapshot.paths().map(|p| p.key().to_string()).collect();
        assert_eq!(live_set(root), expected);
    }

    #[test]
    fn missing_patched_file_is_a_warning() {
        let game = tempdir().unwrap();
        let work = tempdir().unwrap();
        let root = game.path();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("data/a.bed"), b"orig").unwrap();
        let snapshot = OriginalSnapshot::capture(root, "data", &[]).unwrap();

        backup::snapshot(&root.join("data/a.bed"), Path::new("p")).unwrap();
        // patched copy never landed

        let report = restore(root, "data", &[], &snapshot, &work.path().join("s")).unwrap();
        assert_eq!(report.missing_live, 1);
        assert_eq!(fs::read(root.join("data/a.bed")).unwrap(), b"orig");
    }
}
