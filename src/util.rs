use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};

/// A file path truncated to start at the data anchor segment.
///
/// `rel` keeps the on-disk casing with forward slashes so it can be joined back
/// onto any root; equality, hashing and ordering use the lowercased `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DataPath {
    rel: String,
    key: String,
}

impl DataPath {
    pub fn new(rel: &str) -> Self {
        let rel = rel.replace('\\', "/").trim_matches('/').to_string();
        let key = rel.to_lowercase();
        Self { rel, key }
    }

    /// Truncate `relative` so it begins at the first `anchor` component.
    /// Returns `None` when the anchor is absent, is the last component, or
    /// the path is not valid UTF-8.
    pub fn from_relative(relative: &Path, anchor: &str) -> Option<Self> {
        let mut parts = Vec::new();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_str()?);
            }
        }
        let start = parts.iter().position(|p| p.eq_ignore_ascii_case(anchor))?;
        if start + 1 >= parts.len() {
            return None;
        }
        Some(Self::new(&parts[start..].join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.rel
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.rel.split('/')
    }

    pub fn file_name(&self) -> &str {
        self.rel.rsplit('/').next().unwrap_or(&self.rel)
    }

    /// Resolve against an install or extraction root.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }

    /// Copy of this path with segment `index` replaced.
    pub fn with_segment(&self, index: usize, replacement: &str) -> Self {
        let joined = self
            .segments()
            .enumerate()
            .map(|(i, s)| if i == index { replacement } else { s })
            .collect::<Vec<_>>()
            .join("/");
        Self::new(&joined)
    }
}

impl From<String> for DataPath {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<DataPath> for String {
    fn from(value: DataPath) -> Self {
        value.rel
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rel)
    }
}

impl PartialEq for DataPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DataPath {}

impl Hash for DataPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for DataPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Debug, Clone)]
pub struct DataFile {
    pub path: DataPath,
    pub full_path: PathBuf,
    /// File size in bytes. Free from the OS directory scan.
    pub size: u64,
}

/// Walk `root` and collect every file below an `anchor` segment.
/// Directories listed in `skip` are pruned from the walk. Entries come back
/// sorted by file name within each directory, which fixes the apply order.
pub fn walk_data_files(root: &Path, anchor: &str, skip: &[PathBuf]) -> Result<Vec<DataFile>> {
    let root = root.canonicalize().at(root)?;
    let skip: Vec<PathBuf> = skip.iter().filter_map(|p| p.canonicalize().ok()).collect();

    let mut files = Vec::new();
    let walker = WalkDir::new(&root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip.iter().any(|s| e.path() == s.as_path()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
            Error::io(path, std::io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let full_path = entry.path().to_path_buf();
        let Ok(relative) = full_path.strip_prefix(&root) else {
            continue;
        };
        let Some(path) = DataPath::from_relative(relative, anchor) else {
            continue;
        };

        let size = entry.metadata().map_err(|e| Error::io(&full_path, e.into()))?.len();
        files.push(DataFile {
            path,
            full_path,
            size,
        });
    }

    Ok(files)
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path).at(path)?;
    // SAFETY: We only read from this mapping; the engine is single-threaded.
    unsafe { Mmap::map(&file).at(path) }
}
