//! Numbered backup chains with per-directory provenance.
//!
//! Overwriting `body.dds` for the k-th time renames the live file to
//! `body.dds.backup<k-1>`; `backup0` is therefore always the pristine content.
//! Each directory keeps a `backup-index.json` recording, per file name, which
//! extraction directory's copy caused each backup to be taken.
//!
//! Names are the only marker: a data file shipped as `foo.backup2` is taken for
//! a backup, left out of listings and the original snapshot, and deleted by a
//! restore.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};
use crate::store::JsonStore;

pub const INDEX_FILE_NAME: &str = "backup-index.json";
const BACKUP_MARKER: &str = ".backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub sequence: u32,
    pub origin: PathBuf,
}

/// File name -> ordered backup records.
pub type BackupIndex = BTreeMap<String, Vec<BackupRecord>>;

pub fn index_store(dir: &Path) -> JsonStore {
    JsonStore::new(dir.join(INDEX_FILE_NAME))
}

pub fn backup_path(target: &Path, sequence: u32) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(format!("{BACKUP_MARKER}{sequence}"));
    target.with_file_name(name)
}

/// Split `name.ext.backup3` into (`name.ext`, 3).
pub fn parse_backup_name(name: &str) -> Option<(&str, u32)> {
    // ASCII lowercasing keeps byte offsets stable.
    let pos = name.to_ascii_lowercase().rfind(BACKUP_MARKER)?;
    let digits = &name[pos + BACKUP_MARKER.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stem = &name[..pos];
    if stem.is_empty() {
        return None;
    }
    Some((stem, digits.parse().ok()?))
}

/// Live path and sequence number for a backup file path.
pub fn split_backup_path(path: &Path) -> Option<(PathBuf, u32)> {
    let name = path.file_name()?.to_str()?;
    let (stem, sequence) = parse_backup_name(name)?;
    Some((path.with_file_name(stem), sequence))
}

/// Files this tool writes next to data files.
pub fn is_tool_artifact(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == INDEX_FILE_NAME
        || lower == format!("{INDEX_FILE_NAME}.tmp")
        || parse_backup_name(name).is_some()
}

/// Sequence numbers of the backups present for `target`, ascending.
pub fn existing_sequences(target: &Path) -> Result<Vec<u32>> {
    let (dir, name) = split_target(target)?;
    let mut sequences = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some((stem, sequence)) = parse_backup_name(file_name) {
            if stem.eq_ignore_ascii_case(name) {
                sequences.push(sequence);
            }
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}

/// Move `target` aside as its next backup and record `origin`, the patch about
/// to overwrite it. Returns the new sequence number.
///
/// On return the target path is free for the incoming copy. The directory index
/// is loaded before anything moves, so a corrupt index leaves the file in place.
pub fn snapshot(target: &Path, origin: &Path) -> Result<u32> {
    let (dir, name) = split_target(target)?;

    let existing = existing_sequences(target)?;
    let sequence = existing.len() as u32;
    let destination = backup_path(target, sequence);
    if !existing.iter().copied().eq(0..sequence) || destination.exists() {
        return Err(Error::corrupt(
            dir,
            format!("backup chain for {name} is not contiguous: {existing:?}"),
        ));
    }

    let store = index_store(dir);
    let mut index: BackupIndex = store.load()?;

    fs::rename(target, &destination).at(target)?;
    debug!("Backed up {} as sequence {sequence}", target.display());

    let records = index.entry(name.to_string()).or_default();
    if records.last().map(|r| r.sequence) != Some(sequence) {
        records.push(BackupRecord {
            sequence,
            origin: origin.to_path_buf(),
        });
        store.save(&index)?;
    }

    Ok(sequence)
}

fn split_target(target: &Path) -> Result<(&Path, &str)> {
    let dir = target
        .parent()
        .ok_or_else(|| Error::Configuration(format!("{} has no parent", target.display())))?;
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Configuration(format!("{} has no UTF-8 file name", target.display())))?;
    Ok((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_backup_names() {
        assert_eq!(parse_backup_name("body.dds.backup0"), Some(("body.dds", 0)));
        assert_eq!(parse_backup_name("body.dds.BACKUP12"), Some(("body.dds", 12)));
        assert_eq!(parse_backup_name("body.dds.backup"), None);
        assert_eq!(parse_backup_name("body.dds.backupx"), None);
        assert_eq!(parse_backup_name(".backup1"), None);
        assert!(is_tool_artifact("backup-index.json"));
        assert!(!is_tool_artifact("body.dds"));
    }

    #[test]
    fn chain_grows_contiguously_from_pristine() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("body.dds");
        let patches = ["temp/a", "temp/b", "temp/c"];

        fs::write(&target, b"pristine").unwrap();
        for (i, origin) in patches.iter().enumerate() {
            let seq = snapshot(&target, Path::new(origin)).unwrap();
            assert_eq!(seq, i as u32);
            assert!(!target.exists());
            fs::write(&target, format!("from {origin}")).unwrap();
        }

        assert_eq!(existing_sequences(&target).unwrap(), vec![0, 1, 2]);
        assert_eq!(fs::read(backup_path(&target, 0)).unwrap(), b"pristine");
        assert_eq!(fs::read(backup_path(&target, 2)).unwrap(), b"from temp/b");

        let index: BackupIndex = index_store(dir.path()).load().unwrap();
        let records = &index["body.dds"];
        let sequences: Vec<u32> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(records[1].origin, PathBuf::from("temp/b"));
    }

    #[test]
    fn sibling_files_have_independent_chains() {
        let dir = tempdir().unwrap();
        let body = dir.path().join("body.dds");
        let wheel = dir.path().join("wheel.dds");
        fs::write(&body, b"b").unwrap();
        fs::write(&wheel, b"w").unwrap();

        assert_eq!(snapshot(&body, Path::new("p")).unwrap(), 0);
        assert_eq!(snapshot(&wheel, Path::new("p")).unwrap(), 0);
        let index: BackupIndex = index_store(dir.path()).load().unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn gap_past_the_next_slot_is_corruption() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("body.dds");
        fs::write(&target, b"live").unwrap();
        fs::write(backup_path(&target, 0), b"pristine").unwrap();
        fs::write(backup_path(&target, 5), b"stray").unwrap();

        let result = snapshot(&target, Path::new("temp/p"));
        assert!(matches!(result, Err(Error::StateCorruption { .. })));
        assert!(target.exists());
        assert!(!backup_path(&target, 2).exists());
    }

    #[test]
    fn corrupt_index_is_fatal_and_leaves_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("body.dds");
        fs::write(&target, b"live").unwrap();
        fs::write(dir.path().join(INDEX_FILE_NAME), b"\x00garbage").unwrap();

        let result = snapshot(&target, Path::new("p"));
        assert!(matches!(result, Err(Error::StateCorruption { .. })));
        assert!(target.exists());
    }

    #[test]
    fn gap_in_chain_is_reported() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("body.dds");
        fs::write(&target, b"live").unwrap();
        fs::write(backup_path(&target, 1), b"orphan").unwrap();

        assert!(matches!(
            snapshot(&target, Path::new("p")),
            Err(Error::StateCorruption { .. })
        ));
    }
}
