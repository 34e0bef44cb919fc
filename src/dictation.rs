use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::audio::{Capture, DeviceSource};
use crate::session::{RecordingSession, SessionState};

/// Speech recognizer collaborator (enables testing via mocking)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize speech in the finalized recording at `audio`
    ///
    /// # Errors
    /// Returns error if the provider fails
    async fn recognize(&self, audio: &Path) -> Result<String>;
}

/// Destination of recognized text (clipboard, terminal, ...)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextSink: Send + Sync {
    /// # Errors
    /// Returns error if the text could not be delivered
    async fn deliver(&self, text: &str) -> Result<()>;
}

fn split_command(argv: &[String], what: &str) -> Result<(String, Vec<String>)> {
    let (program, args) = argv
        .split_first()
        .with_context(|| format!("{what} command is empty"))?;
    Ok((program.clone(), args.to_vec()))
}

/// Runs `<program> <args..> <recording>` and reads the text from stdout
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
}

impl CommandRecognizer {
    /// # Errors
    /// Returns error if `argv` is empty
    pub fn new(argv: &[String]) -> Result<Self> {
        let (program, args) = split_command(argv, "recognizer")?;
        Ok(Self { program, args })
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(&self, audio: &Path) -> Result<String> {
        info!(program = %self.program, path = %audio.display(), "recognizing speech");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(audio)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run recognizer `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("recognizer exited with {}: {}", output.status, stderr.trim());
        }

        let text = String::from_utf8(output.stdout).context("recognizer output is not UTF-8")?;
        Ok(text.trim().to_owned())
    }
}

/// Pipes the text into `<program> <args..>` (e.g. `wl-copy`, `pbcopy`, `clip`)
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    /// # Errors
    /// Returns error if `argv` is empty
    pub fn new(argv: &[String]) -> Result<Self> {
        let (program, args) = split_command(argv, "output")?;
        Ok(Self { program, args })
    }
}

#[async_trait]
impl TextSink for CommandSink {
    async fn deliver(&self, text: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .with_context(|| format!("failed to get `{}` stdin", self.program))?;
        stdin
            .write_all(text.as_bytes())
            .await
            .with_context(|| format!("failed to write to `{}`", self.program))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("`{}` failed", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{}` exited with {}: {}", self.program, output.status, stderr.trim());
        }

        info!(chars = text.chars().count(), "text delivered");
        Ok(())
    }
}

/// Prints the text on stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

#[async_trait]
impl TextSink for StdoutSink {
    #[allow(clippy::print_stdout)] // Terminal is the output channel here
    async fn deliver(&self, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }
}

/// Result of one trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    /// Recording started into this file
    Started(PathBuf),
    /// Text recognized and delivered; the recording was deleted
    Delivered(String),
    /// Nothing was recognized; the recording was deleted
    Silent,
    /// No recognizer configured; the recording stays until swept
    Recorded(PathBuf),
}

/// Push-to-talk workflow: start, then stop → recognize → deliver → delete
pub struct Dictation<D, C> {
    session: RecordingSession<D, C>,
    recognizer: Option<Box<dyn Recognizer>>,
    sink: Box<dyn TextSink>,
    max_duration: Option<Duration>,
}

impl<D: DeviceSource, C: Capture> Dictation<D, C> {
    /// Workflow over `session` delivering text to `sink`, with no recognizer yet
    pub fn new(session: RecordingSession<D, C>, sink: Box<dyn TextSink>) -> Self {
        Self {
            session,
            recognizer: None,
            sink,
            max_duration: None,
        }
    }

    /// Recognize finished recordings with `recognizer`
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Stop automatically after `max_duration` (checked by the trigger loop)
    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Underlying recording session
    pub const fn session(&self) -> &RecordingSession<D, C> {
        &self.session
    }

    /// Mutable access to the recording session
    pub fn session_mut(&mut self) -> &mut RecordingSession<D, C> {
        &mut self.session
    }

    /// When the recording in progress hits the maximum duration
    pub fn deadline(&self) -> Option<Instant> {
        let max = self.max_duration?;
        self.session.started_at().map(|started| started + max)
    }

    /// Handle one trigger: start when idle, finish when recording
    ///
    /// # Errors
    /// Returns error if the session transition, recognition or delivery fails.
    /// The session is `Idle` after a failed finish.
    pub async fn toggle(&mut self) -> Result<Toggle> {
        match self.session.state() {
            SessionState::Idle => {
                let path = self.session.start(None).await?;
                Ok(Toggle::Started(path))
            }
            SessionState::Recording => self.finish().await,
        }
    }

    async fn finish(&mut self) -> Result<Toggle> {
        let path = self.session.stop().await?;

        let Some(recognizer) = &self.recognizer else {
            info!(path = %path.display(), "no recognizer configured, recording kept");
            return Ok(Toggle::Recorded(path));
        };

        // On failure the recording is left for the age-based sweep
        let text = recognizer
            .recognize(&path)
            .await
            .with_context(|| format!("failed to recognize {}", path.display()))?;
        let text = text.trim();

        if text.is_empty() {
            info!("no speech recognized");
            self.discard(&path);
            return Ok(Toggle::Silent);
        }

        self.sink
            .deliver(text)
            .await
            .context("failed to deliver recognized text")?;
        self.discard(&path);

        Ok(Toggle::Delivered(text.to_owned()))
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = self.session.store().delete(path) {
            warn!("failed to delete consumed recording: {}", e);
        }
    }

    /// Finalize a recording in progress and remove all stored recordings
    pub async fn shutdown(&mut self) {
        if self.session.is_recording() {
            if let Err(e) = self.session.stop().await {
                warn!("failed to stop recording on shutdown: {}", e);
            }
        }
        self.session.store().purge_all();
    }
}
