use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::backup;
use crate::error::Result;
use crate::util::{self, DataFile, DataPath};

/// List the data files under `root`, skipping backups and backup indexes.
///
/// Backups are recognised by name alone, so a data file literally named
/// `*.backup<N>` is skipped too.
pub fn list_data_files(root: &Path, anchor: &str, skip: &[PathBuf]) -> Result<Vec<DataFile>> {
    Ok(util::walk_data_files(root, anchor, skip)?
        .into_iter()
        .filter(|f| !backup::is_tool_artifact(f.path.file_name()))
        .collect())
}

/// Paths present in every one of `sets`.
///
/// Each set is de-duplicated before counting, so a path repeated inside one
/// set does not stand in for its absence from another.
pub fn intersect<'a, I, S>(sets: I) -> BTreeSet<DataPath>
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = &'a DataPath>,
{
    let mut counts: HashMap<&'a DataPath, usize> = HashMap::new();
    let mut set_count = 0;

    for set in sets {
        set_count += 1;
        let unique: HashSet<&'a DataPath> = set.into_iter().collect();
        for path in unique {
            *counts.entry(path).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .filter(|&(_, count)| count == set_count)
        .map(|(path, _)| path.clone())
        .collect()
}

/// Conflict set shared by two named file sets.
#[derive(Debug, Clone, Serialize)]
pub struct Overlap {
    pub first: String,
    pub second: String,
    pub paths: BTreeSet<DataPath>,
}

/// Every non-empty pairwise intersection, in input order.
pub fn pairwise_overlaps(sets: &[(String, Vec<DataPath>)]) -> Vec<Overlap> {
    let mut overlaps = Vec::new();
    for (i, (first, a)) in sets.iter().enumerate() {
        for (second, b) in &sets[i + 1..] {
            let paths = intersect([a.iter(), b.iter()]);
            if !paths.is_empty() {
                overlaps.push(Overlap {
                    first: first.clone(),
                    second: second.clone(),
                    paths,
                });
            }
        }
    }
    overlaps
}
