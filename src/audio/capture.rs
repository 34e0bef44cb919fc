use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::tool::{CaptureTool, ToolUnavailable};

/// Byte the capture tool treats as "finish and close the file"
const QUIT_COMMAND: &[u8] = b"q";

/// Errors from the capture subprocess
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture tool missing or broken
    #[error(transparent)]
    ToolUnavailable(#[from] ToolUnavailable),

    /// A capture is already running
    #[error("capture already running (writing {})", output_path.display())]
    AlreadyRunning {
        /// File written by the running capture
        output_path: PathBuf,
    },

    /// `stop` without a running capture
    #[error("no capture running")]
    NotRunning,

    /// The subprocess could not be spawned
    #[error("failed to spawn capture tool `{program}`: {source}")]
    Spawn {
        /// Program that failed to spawn
        program: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The subprocess exited right after being spawned
    #[error("capture tool exited on start with {status}: {diagnostic}")]
    StartupExit {
        /// Exit status
        status: ExitStatus,
        /// Last diagnostic line
        diagnostic: String,
    },

    /// The subprocess finished unsuccessfully
    #[error("capture tool exited with {status}: {diagnostic}")]
    Process {
        /// Exit status
        status: ExitStatus,
        /// Last diagnostic line
        diagnostic: String,
    },

    /// The subprocess ignored the quit command and was killed
    #[error("capture tool did not finish within {timeout:?} and was killed")]
    StopTimeout {
        /// Configured stop timeout
        timeout: Duration,
    },

    /// Waiting on the subprocess failed
    #[error("failed to wait for capture tool: {0}")]
    Wait(#[from] std::io::Error),
}

/// Capture lifecycle (enables testing via mocking)
///
/// Production code uses [`CaptureProcess`]; session tests use `MockCapture`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Capture: Send {
    /// Start recording `device` into `output_path`; returns once the recorder runs
    ///
    /// # Errors
    /// `ToolUnavailable`, `AlreadyRunning`, `Spawn` or `StartupExit`
    async fn start(&mut self, device: &str, output_path: &Path) -> Result<(), CaptureError>;

    /// Finalize the file and wait for the recorder to exit
    ///
    /// # Errors
    /// `NotRunning`, `Process`, `StopTimeout` or `Wait`
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Whether a recorder subprocess is held
    fn is_running(&self) -> bool;
}

/// A running recorder subprocess
struct ActiveCapture {
    child: Child,
    output_path: PathBuf,
    /// Drains stderr; resolves to the last non-empty line once the tool exits
    diagnostics: JoinHandle<Option<String>>,
    started_at: Instant,
}

/// At most one external recorder subprocess writing an encoded file
pub struct CaptureProcess {
    tool: CaptureTool,
    startup_probe: Duration,
    stop_timeout: Duration,
    active: Option<ActiveCapture>,
}

impl CaptureProcess {
    /// Idle recorder driven by `tool`, with a 150 ms startup probe and 10 s stop timeout
    pub fn new(tool: CaptureTool) -> Self {
        Self {
            tool,
            startup_probe: Duration::from_millis(150),
            stop_timeout: Duration::from_secs(10),
            active: None,
        }
    }

    /// Window after spawn in which an exit is reported as a failed start
    #[must_use]
    pub fn with_startup_probe(mut self, probe: Duration) -> Self {
        self.startup_probe = probe;
        self
    }

    /// How long `stop` waits before killing the recorder
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// File being written by the running recorder
    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.output_path.as_path())
    }
}

#[async_trait]
impl Capture for CaptureProcess {
    #[tracing::instrument(skip(self), fields(program = %self.tool.program().display()))]
    async fn start(&mut self, device: &str, output_path: &Path) -> Result<(), CaptureError> {
        if let Some(active) = &self.active {
            return Err(CaptureError::AlreadyRunning {
                output_path: active.output_path.clone(),
            });
        }

        self.tool.ensure_available().await?;

        let mut child = self
            .tool
            .record_command(device, output_path)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.tool.program().display().to_string(),
                source,
            })?;

        let diagnostics = tokio::spawn(drain_diagnostics(child.stderr.take()));

        if !self.startup_probe.is_zero() {
            tokio::time::sleep(self.startup_probe).await;
            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    let diagnostic = diagnostics.await.ok().flatten();
                    return Err(failed_start(
                        output_path,
                        CaptureError::StartupExit {
                            status,
                            diagnostic: describe(diagnostic),
                        },
                    ));
                }
                Err(e) => {
                    diagnostics.abort();
                    return Err(failed_start(output_path, CaptureError::Wait(e)));
                }
            }
        }

        info!(
            pid = ?child.id(),
            device = device,
            path = %output_path.display(),
            "capture started"
        );

        self.active = Some(ActiveCapture {
            child,
            output_path: output_path.to_path_buf(),
            diagnostics,
            started_at: Instant::now(),
        });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn stop(&mut self) -> Result<(), CaptureError> {
        let mut active = self.active.take().ok_or(CaptureError::NotRunning)?;

        if let Some(mut stdin) = active.child.stdin.take() {
            // Broken pipe here means the tool already exited; wait() reports why
            if let Err(e) = stdin.write_all(QUIT_COMMAND).await {
                warn!("failed to send quit command: {}", e);
            } else if let Err(e) = stdin.flush().await {
                warn!("failed to flush quit command: {}", e);
            }
        }

        let status = match tokio::time::timeout(self.stop_timeout, active.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(timeout = ?self.stop_timeout, "capture tool ignored quit, killing");
                if let Err(e) = active.child.kill().await {
                    warn!("failed to kill capture tool: {}", e);
                }
                active.diagnostics.abort();
                return Err(CaptureError::StopTimeout {
                    timeout: self.stop_timeout,
                });
            }
        };

        let diagnostic = active.diagnostics.await.ok().flatten();
        let elapsed = active.started_at.elapsed();

        if !status.success() {
            warn!(%status, "capture tool failed");
            return Err(CaptureError::Process {
                status,
                diagnostic: describe(diagnostic),
            });
        }

        info!(
            duration_ms = elapsed.as_millis(),
            path = %active.output_path.display(),
            "capture finalized"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

/// Log every diagnostic line; return the last non-empty one
async fn drain_diagnostics(stderr: Option<ChildStderr>) -> Option<String> {
    let stderr = stderr?;
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    warn!("capture tool: {}", line);
                    last = Some(line.to_owned());
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("diagnostic stream closed: {}", e);
                break;
            }
        }
    }

    last
}

fn describe(diagnostic: Option<String>) -> String {
    diagnostic.unwrap_or_else(|| "no diagnostic output".to_owned())
}

/// Drop whatever the aborted recorder wrote before reporting `error`
fn failed_start(output_path: &Path, error: CaptureError) -> CaptureError {
    remove_partial_file(output_path);
    error
}

fn remove_partial_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed partial file: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove partial file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_tool() -> CaptureProcess {
        CaptureProcess::new(CaptureTool::new("/nonexistent/ffmpeg", "dshow"))
    }

    #[tokio::test]
    async fn test_stop_without_start_is_not_running() {
        let mut capture = missing_tool();
        let err = capture.stop().await.unwrap_err();
        assert!(matches!(err, CaptureError::NotRunning));
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn test_start_with_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("recording_1.ogg");

        let mut capture = missing_tool();
        let err = capture.start("mic1", &output).await.unwrap_err();

        assert!(matches!(err, CaptureError::ToolUnavailable(_)));
        assert!(!capture.is_running());
        assert!(capture.output_path().is_none());
        assert!(!output.exists());
    }

    #[test]
    fn test_describe_without_diagnostic() {
        assert_eq!(describe(None), "no diagnostic output");
        assert_eq!(describe(Some("boom".to_owned())), "boom");
    }

    #[test]
    fn test_failed_start_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("recording_1.ogg");
        std::fs::write(&partial, b"OggS").unwrap();

        let err = failed_start(
            &partial,
            CaptureError::Wait(std::io::Error::other("poll failed")),
        );

        assert!(matches!(err, CaptureError::Wait(_)));
        assert!(!partial.exists());
    }

    #[test]
    fn test_remove_partial_file_missing_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ogg");
        remove_partial_file(&path);

        let partial = dir.path().join("partial.ogg");
        std::fs::write(&partial, b"OggS").unwrap();
        remove_partial_file(&partial);
        assert!(!partial.exists());
    }
}
