//! Error taxonomy for the patch engine.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required path or tool is missing or unusable. Fatal, raised before any mutation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A manifest entry does not point at an existing archive of the expected type.
    #[error("missing archive: {}", .0.display())]
    MissingArchive(PathBuf),

    /// An indexed file vanished from an extracted patch before it could be applied.
    #[error("missing source file: {}", .0.display())]
    MissingSourceFile(PathBuf),

    /// Persisted state (backup index, snapshot) exists but cannot be trusted.
    #[error("corrupt state in {}: {reason}", path.display())]
    StateCorruption { path: PathBuf, reason: String },

    /// No free resource ID remains in the identifier space.
    #[error("no free resource ID above {0}")]
    IdentifierExhaustion(u32),

    #[error("extraction of {} failed: {reason}", archive.display())]
    Extraction { archive: PathBuf, reason: String },

    #[error("cannot {action} while the run is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Error::StateCorruption {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Per-archive and per-file failures: the run warns and moves on.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::MissingArchive(_) | Error::MissingSourceFile(_) | Error::Extraction { .. }
        )
    }

    pub(crate) fn extraction_status(archive: &Path, status: ExitStatus, stderr: &[String]) -> Self {
        let tail = stderr.last().map(String::as_str).unwrap_or("no error output");
        Error::Extraction {
            archive: archive.to_path_buf(),
            reason: format!("extractor exited with {status}: {tail}"),
        }
    }
}

/// Attach a path to a raw I/O result.
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
