//! Versioned key-value documents persisted as JSON files.
//!
//! Every document is wrapped in `{"version": N, "entries": ...}`. A missing file
//! reads as an empty document; anything unparseable or written by an unknown
//! version is reported as [`Error::StateCorruption`] and never silently reset.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, IoContext, Result};

pub const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    entries: T,
}

#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(Error::corrupt(&self.path, "not valid UTF-8"))
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        let envelope: Envelope<T> =
            serde_json::from_str(&content).map_err(|e| Error::corrupt(&self.path, e))?;
        if envelope.version != STORE_VERSION {
            return Err(Error::corrupt(
                &self.path,
                format!(
                    "unsupported version {} (expected {STORE_VERSION})",
                    envelope.version
                ),
            ));
        }
        Ok(envelope.entries)
    }

    /// Write through a sibling temp file and rename over the target.
    pub fn save<T: Serialize>(&self, entries: &T) -> Result<()> {
        let envelope = Envelope {
            version: STORE_VERSION,
            entries,
        };
        let content = serde_json::to_string_pretty(&envelope)
            .map_err(|e| Error::io(&self.path, std::io::Error::other(e)))?;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        fs::write(&tmp, content).at(&tmp)?;
        fs::rename(&tmp, &self.path).at(&self.path)
    }
}
