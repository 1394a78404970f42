//! The external archive extractor, run as a child process.

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, IoContext, Result};
use crate::manifest::PatchArchive;

pub const ARCHIVE_PLACEHOLDER: &str = "{archive}";

#[derive(Debug)]
pub struct ExtractionLog {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Extractor {
    program: PathBuf,
    args: Vec<String>,
}

impl Extractor {
    /// `args` is a template; each `{archive}` is replaced with the archive path.
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Run the extractor with `dest` as its working directory, forwarding its
    /// output to the log line by line, and wait for it to exit.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractionLog> {
        let archive_arg = archive.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(ARCHIVE_PLACEHOLDER, &archive_arg))
            .collect();
        info!(
            "Executing: '{} {}' at '{}'",
            self.program.display(),
            args.join(" "),
            dest.display()
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Extraction {
                archive: archive.to_path_buf(),
                reason: format!("cannot launch {}: {e}", self.program.display()),
            })?;

        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take().map(BufReader::new);
        let (stdout, stderr) = tokio::join!(
            forward_lines(stdout, false),
            forward_lines(stderr, true)
        );
        let status = child.wait().await.at(&self.program)?;

        let log = ExtractionLog {
            status,
            stdout: stdout.at(&self.program)?,
            stderr: stderr.at(&self.program)?,
        };
        if !log.status.success() {
            return Err(Error::extraction_status(archive, log.status, &log.stderr));
        }
        Ok(log)
    }

    /// Extract `patch` unless its work directory already exists. A failed
    /// extraction removes the partial directory so a later run retries.
    pub async fn ensure_extracted(&self, patch: &PatchArchive) -> Result<Option<ExtractionLog>> {
        if patch.work_dir.exists() {
            return Ok(None);
        }
        tokio::fs::create_dir_all(&patch.work_dir)
            .await
            .at(&patch.work_dir)?;

        match self.extract(&patch.archive, &patch.work_dir).await {
            Ok(log) => Ok(Some(log)),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&patch.work_dir).await {
                    warn!(
                        "Could not remove partial extraction {}: {cleanup}",
                        patch.work_dir.display()
                    );
                }
                Err(e)
            }
        }
    }
}

async fn forward_lines<R>(reader: Option<R>, is_stderr: bool) -> std::io::Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(reader) = reader else {
        return Ok(captured);
    };
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if is_stderr {
            warn!("{line}");
        } else {
            info!("{line}");
        }
        captured.push(line);
    }
    Ok(captured)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shell(script: &str) -> Extractor {
        Extractor::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string(), "sh".to_string(), ARCHIVE_PLACEHOLDER.to_string()],
        )
    }

    #[tokio::test]
    async fn captures_both_streams_and_runs_in_dest() {
        let dir = tempdir().unwrap();
        let extractor = shell("echo \"unpacking $1\"; echo warning >&2; mkdir -p data; touch data/x.bed");
        let log = extractor
            .extract(Path::new("/tmp/a.bfs"), dir.path())
            .await
            .unwrap();

        assert_eq!(log.stdout, vec!["unpacking /tmp/a.bfs"]);
        assert_eq!(log.stderr, vec!["warning"]);
        assert!(dir.path().join("data/x.bed").exists());
    }

    #[tokio::test]
    async fn existing_work_dir_skips_extraction() {
        let dir = tempdir().unwrap();
        let patch = PatchArchive {
            archive: dir.path().join("a.bfs"),
            work_dir: dir.path().join("a"),
        };
        std::fs::create_dir_all(&patch.work_dir).unwrap();

        let result = shell("exit 1").ensure_extracted(&patch).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn failure_removes_partial_dir() {
        let dir = tempdir().unwrap();
        let patch = PatchArchive {
            archive: dir.path().join("a.bfs"),
            work_dir: dir.path().join("a"),
        };

        let result = shell("touch half; echo broken >&2; exit 3")
            .ensure_extracted(&patch)
            .await;
        match result {
            Err(Error::Extraction { reason, .. }) => assert!(reason.contains("broken")),
            other => panic!("expected extraction error, got {other:?}"),
        }
        assert!(!patch.work_dir.exists());
    }
}
