use clap::Args;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Paths and conventions shared by the commands that touch an install.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Base application install directory
    #[arg(long, env = "PATCHSTACK_GAME_DIR")]
    pub game_dir: PathBuf,

    /// Manifest listing patch archives in apply order, one per line
    #[arg(long, env = "PATCHSTACK_MANIFEST")]
    pub manifest: PathBuf,

    /// Archive extractor executable
    #[arg(long, env = "PATCHSTACK_EXTRACTOR")]
    pub extractor: PathBuf,

    /// Extractor argument template; `{archive}` is replaced by the archive path. Repeat per argument.
    #[arg(
        long = "extractor-arg",
        default_values = ["x", "{archive}", "-v"],
        allow_hyphen_values = true
    )]
    pub extractor_args: Vec<String>,

    /// Extraction and state directory [default: <game-dir>/temp]
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    #[command(flatten)]
    pub layout: Layout,

    /// Required archive file extension
    #[arg(long, default_value = "bfs")]
    pub archive_ext: String,

    /// Directory-name prefix that precedes a numeric resource ID
    #[arg(long, default_value = "car_")]
    pub id_prefix: String,
}

/// Where the data lives inside an install.
#[derive(Args, Debug, Clone)]
pub struct Layout {
    /// Path segment at which data-relative paths begin
    #[arg(long, default_value = "data")]
    pub anchor: String,
}

/// Validated settings. Constructing one performs no mutation beyond creating
/// the work directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub game_dir: PathBuf,
    pub manifest: PathBuf,
    pub extractor: PathBuf,
    pub extractor_args: Vec<String>,
    pub work_dir: PathBuf,
    pub anchor: String,
    pub archive_ext: String,
    pub id_prefix: String,
}

impl Settings {
    pub fn validate(self) -> Result<Config> {
        let game_dir = existing_dir(&self.game_dir, "game")?;
        existing_dir(&game_dir.join(&self.layout.anchor), "data")?;

        if !self.manifest.is_file() {
            return Err(Error::Configuration(format!(
                "can't access patch manifest {}",
                self.manifest.display()
            )));
        }
        if !self.extractor.is_file() {
            return Err(Error::Configuration(format!(
                "can't access extractor {}",
                self.extractor.display()
            )));
        }
        if !is_executable(&self.extractor) {
            return Err(Error::Configuration(format!(
                "extractor {} isn't an executable",
                self.extractor.display()
            )));
        }
        if self.id_prefix.is_empty() || !self.id_prefix.is_ascii() {
            return Err(Error::Configuration(
                "resource ID prefix must be non-empty ASCII".to_string(),
            ));
        }

        let work_dir = work_dir_for(&game_dir, self.work_dir.as_deref());
        std::fs::create_dir_all(&work_dir).at(&work_dir)?;

        Ok(Config {
            game_dir,
            manifest: self.manifest,
            extractor: self.extractor,
            extractor_args: self.extractor_args,
            work_dir,
            anchor: self.layout.anchor,
            archive_ext: self.archive_ext.trim_start_matches('.').to_string(),
            id_prefix: self.id_prefix,
        })
    }
}

pub fn work_dir_for(game_dir: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| game_dir.join("temp"), Path::to_path_buf)
}

pub fn existing_dir(path: &Path, what: &str) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(Error::Configuration(format!(
            "can't access {what} directory {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exe"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(any(unix, windows)))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
