//! Resource-ID collision detection and remapping.
//!
//! An asset slot is a directory segment made of a fixed prefix followed by a
//! run of digits, e.g. `car_5` in `data/cars/car_5/body.dds`. The digit run is
//! the resource ID and must be unique across the install.
//!
//! A patch claiming slot `car_5` overwrites that asset when at least one of its
//! files under the slot matches a file already owned by it. Otherwise, if ID 5
//! is already taken, the patch is shipping a different asset under a used ID
//! and its slot is moved to a fresh ID for the rest of the run.

use log::info;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::util::DataPath;

/// Grammar: a segment that starts with `prefix` (ASCII, case-insensitive),
/// continues with one or more digits and nothing else, and is followed by at
/// least one more segment.
#[derive(Debug, Clone)]
pub struct IdGrammar {
    prefix: String,
}

/// A parsed slot reference inside a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: u32,
    /// Index of the slot segment within the path.
    pub segment: usize,
    /// Key of the path up to and including the slot segment.
    pub slot: String,
    /// Key of the remainder below the slot.
    pub sub_path: String,
}

impl IdGrammar {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_ascii_lowercase(),
        }
    }

    pub fn parse(&self, path: &DataPath) -> Option<ResourceRef> {
        let segments: Vec<&str> = path.key().split('/').collect();
        let last = segments.len().checked_sub(1)?;

        for (index, segment) in segments[..last].iter().enumerate() {
            let Some(digits) = segment.strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Ok(id) = digits.parse::<u32>() else {
                continue;
            };
            return Some(ResourceRef {
                id,
                segment: index,
                slot: segments[..=index].join("/"),
                sub_path: segments[index + 1..].join("/"),
            });
        }
        None
    }

    /// Rewrite the slot segment of `path` to carry `id`, keeping the on-disk
    /// casing of the prefix.
    pub fn substitute(&self, path: &DataPath, reference: &ResourceRef, id: u32) -> DataPath {
        let original = path.segments().nth(reference.segment).unwrap_or_default();
        let prefix = original.get(..self.prefix.len()).unwrap_or(&self.prefix);
        path.with_segment(reference.segment, &format!("{prefix}{id}"))
    }
}

/// Session-scoped remapper. Created empty per run, never persisted.
#[derive(Debug)]
pub struct ResourceIdResolver {
    grammar: IdGrammar,
    known_ids: BTreeSet<u32>,
    /// Slot key -> sub-paths of the files that currently own it.
    owners: HashMap<String, BTreeSet<String>>,
    remap_by_id: BTreeMap<u32, u32>,
    remap_by_path: HashMap<String, u32>,
    /// Slots of the staged patch that collide.
    colliding: HashSet<String>,
}

impl ResourceIdResolver {
    /// Seed known IDs and slot owners from the original install.
    pub fn new<'a>(grammar: IdGrammar, pristine: impl IntoIterator<Item = &'a DataPath>) -> Self {
        let mut resolver = Self {
            grammar,
            known_ids: BTreeSet::new(),
            owners: HashMap::new(),
            remap_by_id: BTreeMap::new(),
            remap_by_path: HashMap::new(),
            colliding: HashSet::new(),
        };
        for path in pristine {
            if let Some(reference) = resolver.grammar.parse(path) {
                resolver.claim(&reference);
            }
        }
        resolver
    }

    pub fn known_ids(&self) -> &BTreeSet<u32> {
        &self.known_ids
    }

    pub fn remaps(&self) -> &BTreeMap<u32, u32> {
        &self.remap_by_id
    }

    /// Decide, before any file of a patch is resolved, which of its slots
    /// collide. The decision is made per slot over the whole patch so every
    /// file of a colliding slot moves together.
    pub fn stage_patch<'a>(&mut self, files: impl IntoIterator<Item = &'a DataPath>) {
        let mut claims: BTreeMap<String, (u32, BTreeSet<String>)> = BTreeMap::new();
        for path in files {
            if let Some(reference) = self.grammar.parse(path) {
                claims
                    .entry(reference.slot)
                    .or_insert_with(|| (reference.id, BTreeSet::new()))
                    .1
                    .insert(reference.sub_path);
            }
        }

        self.colliding.clear();
        for (slot, (id, sub_paths)) in claims {
            if !self.known_ids.contains(&id) {
                continue;
            }
            let same_asset = self
                .owners
                .get(&slot)
                .is_some_and(|owned| !owned.is_disjoint(&sub_paths));
            if !same_asset {
                self.colliding.insert(slot);
            }
        }
    }

    /// Destination for `candidate`: unchanged unless its slot collides, in
    /// which case the slot segment carries the remapped ID.
    pub fn resolve(&mut self, candidate: &DataPath) -> Result<DataPath> {
        let Some(reference) = self.grammar.parse(candidate) else {
            return Ok(candidate.clone());
        };

        if !self.colliding.contains(&reference.slot) {
            self.claim(&reference);
            return Ok(candidate.clone());
        }

        let target = match self
            .remap_by_path
            .get(candidate.key())
            .or_else(|| self.remap_by_id.get(&reference.id))
        {
            Some(&target) => target,
            None => {
                let fresh = self.allocate()?;
                self.remap_by_id.insert(reference.id, fresh);
                info!("Resource ID {} collides; remapped to {fresh}", reference.id);
                fresh
            }
        };
        self.remap_by_path.insert(candidate.key().to_string(), target);

        let resolved = self.grammar.substitute(candidate, &reference, target);
        if let Some(moved) = self.grammar.parse(&resolved) {
            self.claim(&moved);
        }
        Ok(resolved)
    }

    /// Smallest unused ID above the lowest known one.
    fn allocate(&mut self) -> Result<u32> {
        let floor = self.known_ids.first().copied().unwrap_or(0);
        let mut candidate = floor.checked_add(1).ok_or(Error::IdentifierExhaustion(floor))?;
        while self.known_ids.contains(&candidate) {
            candidate = candidate
                .checked_add(1)
                .ok_or(Error::IdentifierExhaustion(floor))?;
        }
        self.known_ids.insert(candidate);
        Ok(candidate)
    }

    fn claim(&mut self, reference: &ResourceRef) {
        self.known_ids.insert(reference.id);
        self.owners
            .entry(reference.slot.clone())
            .or_default()
            .insert(reference.sub_path.clone());
    }
}
