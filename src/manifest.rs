use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One archive reference and the directory it extracts into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchArchive {
    pub archive: PathBuf,
    pub work_dir: PathBuf,
}

impl PatchArchive {
    pub fn name(&self) -> String {
        self.work_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Entry must name an existing file whose extension matches `extension`.
    pub fn check(&self, extension: &str) -> Result<()> {
        let matches_ext = self
            .archive
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if self.archive.is_file() && matches_ext {
            Ok(())
        } else {
            Err(Error::MissingArchive(self.archive.clone()))
        }
    }
}

/// Archives in apply order.
#[derive(Debug, Clone)]
pub struct PatchManifest {
    pub path: PathBuf,
    pub entries: Vec<PatchArchive>,
}

/// Read `manifest_path` (one archive per line, relative to the manifest's own
/// directory) and pair every archive with `<work_root>/<archive stem>`.
pub fn resolve(manifest_path: &Path, work_root: &Path) -> Result<PatchManifest> {
    let content = fs::read_to_string(manifest_path).map_err(|e| {
        Error::Configuration(format!(
            "cannot read manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    let base = manifest_path.parent().unwrap_or_else(|| Path::new(""));

    let entries = content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let archive = base.join(line);
            let stem = archive.file_stem().unwrap_or_default().to_os_string();
            PatchArchive {
                work_dir: work_root.join(stem),
                archive,
            }
        })
        .collect();

    Ok(PatchManifest {
        path: manifest_path.to_path_buf(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entries_resolve_relative_to_manifest_in_order() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("patches").join("order.txt");
        fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        fs::write(&manifest, "zeta.bfs\r\n\r\nsub/alpha.BFS\n").unwrap();

        let work = dir.path().join("temp");
        let resolved = resolve(&manifest, &work).unwrap();

        assert_eq!(resolved.entries.len(), 2);
        assert_eq!(resolved.entries[0].archive, dir.path().join("patches/zeta.bfs"));
        assert_eq!(resolved.entries[0].work_dir, work.join("zeta"));
        assert_eq!(resolved.entries[1].archive, dir.path().join("patches/sub/alpha.BFS"));
        assert_eq!(resolved.entries[1].name(), "alpha");
    }

    #[test]
    fn missing_manifest_is_configuration_error() {
        let dir = tempdir().unwrap();
        let result = resolve(&dir.path().join("absent.txt"), dir.path());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn check_rejects_missing_and_wrong_type() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bfs"), b"x").unwrap();
        fs::write(dir.path().join("b.zip"), b"x").unwrap();
        let entry = |name: &str| PatchArchive {
            archive: dir.path().join(name),
            work_dir: dir.path().join("w"),
        };

        assert!(entry("a.bfs").check("bfs").is_ok());
        assert!(matches!(entry("b.zip").check("bfs"), Err(Error::MissingArchive(_))));
        assert!(matches!(entry("c.bfs").check("bfs"), Err(Error::MissingArchive(_))));
    }
}
