use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::backup;
use crate::digest::{self, Digest};
use crate::error::{Error, IoContext, Result};
use crate::util::{self, DataPath};

pub const MAGIC: &[u8; 8] = b"PSSNAP01";
pub const FORMAT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE_NAME: &str = "pristine.snapshot";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    anchor: String,
    files: Vec<PristineFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PristineFile {
    path: String,
    blake3: [u8; 32],
}

/// The set of data files present in the base install before any patch ran,
/// with their content digests. Immutable once built.
#[derive(Debug, Clone)]
pub struct OriginalSnapshot {
    anchor: String,
    files: BTreeMap<DataPath, Digest>,
}

impl OriginalSnapshot {
    /// Index and hash the install under `root`. Hashing is read-only and runs
    /// on the Rayon pool; nothing here mutates the install.
    pub fn capture(root: &Path, anchor: &str, skip: &[PathBuf]) -> Result<Self> {
        let files: Vec<_> = util::walk_data_files(root, anchor, skip)?
            .into_iter()
            .filter(|f| !backup::is_tool_artifact(f.path.file_name()))
            .collect();

        let hashed = files
            .par_iter()
            .map(|f| -> Result<(DataPath, Digest)> {
                Ok((f.path.clone(), digest::digest(&f.full_path)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            anchor: anchor.to_string(),
            files: hashed,
        })
    }

    /// Load from `path`; `Ok(None)` when no snapshot has been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        // mmap the snapshot, check magic, then stream-decompress into bincode
        let raw = util::mmap_file(path)?;
        if raw.len() < MAGIC.len() || &raw[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt(path, "missing snapshot magic header"));
        }
        let decoder = zstd::Decoder::new(&raw[MAGIC.len()..]).at(path)?;
        let file: SnapshotFile =
            bincode::deserialize_from(decoder).map_err(|e| Error::corrupt(path, e))?;

        if file.version != FORMAT_VERSION {
            return Err(Error::corrupt(
                path,
                format!(
                    "unsupported snapshot version: {} (expected {FORMAT_VERSION})",
                    file.version
                ),
            ));
        }

        let files = file
            .files
            .into_iter()
            .map(|f| (DataPath::new(&f.path), Digest::from_bytes(f.blake3)))
            .collect();
        Ok(Some(Self {
            anchor: file.anchor,
            files,
        }))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = SnapshotFile {
            version: FORMAT_VERSION,
            anchor: self.anchor.clone(),
            files: self
                .files
                .iter()
                .map(|(p, d)| PristineFile {
                    path: p.as_str().to_string(),
                    blake3: *d.as_bytes(),
                })
                .collect(),
        };

        // Serialize, compress, write
        let encoded =
            bincode::serialize(&file).map_err(|e| Error::io(path, std::io::Error::other(e)))?;
        let compressed = zstd::bulk::compress(&encoded, 3).at(path)?;

        let mut out = std::fs::File::create(path).at(path)?;
        out.write_all(MAGIC).at(path)?;
        out.write_all(&compressed).at(path)?;
        out.flush().at(path)
    }

    /// Reuse the persisted snapshot if present, otherwise capture and persist one.
    pub fn load_or_capture(
        snapshot_path: &Path,
        root: &Path,
        anchor: &str,
        skip: &[PathBuf],
    ) -> Result<Self> {
        if let Some(snapshot) = Self::load(snapshot_path)? {
            if !snapshot.anchor.eq_ignore_ascii_case(anchor) {
                return Err(Error::corrupt(
                    snapshot_path,
                    format!(
                        "snapshot was taken for anchor '{}', not '{anchor}'",
                        snapshot.anchor
                    ),
                ));
            }
            info!("Loaded original snapshot: {} files", snapshot.len());
            return Ok(snapshot);
        }

        let snapshot = Self::capture(root, anchor, skip)?;
        if has_backups(root, anchor, skip)? {
            warn!(
                "Install already contains backups; the new snapshot of {} may not be pristine",
                root.display()
            );
        }
        snapshot.save(snapshot_path)?;
        info!(
            "Captured original snapshot: {} files -> {}",
            snapshot.len(),
            snapshot_path.display()
        );
        Ok(snapshot)
    }

    pub fn contains(&self, path: &DataPath) -> bool {
        self.files.contains_key(path)
    }

    /// The snapshot's own spelling of `path`, when it is a pristine file.
    pub fn canonical(&self, path: &DataPath) -> Option<&DataPath> {
        self.files.get_key_value(path).map(|(k, _)| k)
    }

    pub fn digest_of(&self, path: &DataPath) -> Option<&Digest> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &DataPath> {
        self.files.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_backups(root: &Path, anchor: &str, skip: &[PathBuf]) -> Result<bool> {
    Ok(util::walk_data_files(root, anchor, skip)?
        .iter()
        .any(|f| backup::parse_backup_name(f.path.file_name()).is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn install(root: &Path) {
        fs::create_dir_all(root.join("data/cars/car_5")).unwrap();
        fs::write(root.join("data/cars/car_5/body.dds"), b"body").unwrap();
        fs::write(root.join("data/cars/car_5/body.dds.backup0"), b"old").unwrap();
        fs::write(root.join("data/cars/car_5/backup-index.json"), b"{}").unwrap();
        fs::write(root.join("data/menu.bed"), b"menu").unwrap();
    }

    #[test]
    fn capture_excludes_tool_artifacts() {
        let dir = tempdir().unwrap();
        install(dir.path());
        let snapshot = OriginalSnapshot::capture(dir.path(), "data", &[]).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&DataPath::new("DATA/CARS/car_5/BODY.dds")));
        assert_eq!(
            snapshot.digest_of(&DataPath::new("data/menu.bed")),
            Some(&blake3::hash(b"menu"))
        );
    }

    #[test]
    fn persisted_snapshot_is_reused() {
        let dir = tempdir().unwrap();
        let work = tempdir().unwrap();
        install(dir.path());
        let snap_path = work.path().join(SNAPSHOT_FILE_NAME);

        let first = OriginalSnapshot::load_or_capture(&snap_path, dir.path(), "data", &[]).unwrap();
        fs::write(dir.path().join("data/added_later.bed"), b"new").unwrap();
        let second = OriginalSnapshot::load_or_capture(&snap_path, dir.path(), "data", &[]).unwrap();

        assert_eq!(first.len(), second.len());
        assert!(!second.contains(&DataPath::new("data/added_later.bed")));
    }

    #[test]
    fn truncated_snapshot_is_corruption() {
        let work = tempdir().unwrap();
        let snap_path = work.path().join(SNAPSHOT_FILE_NAME);
        fs::write(&snap_path, b"PSSNAP01\x28\xb5").unwrap();
        assert!(matches!(
            OriginalSnapshot::load(&snap_path),
            Err(Error::StateCorruption { .. })
        ));

        fs::write(&snap_path, b"nope").unwrap();
        assert!(matches!(
            OriginalSnapshot::load(&snap_path),
            Err(Error::StateCorruption { .. })
        ));
    }
}
