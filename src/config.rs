use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default recordings retention window (10 minutes)
pub const DEFAULT_MAX_AGE_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub dictation: DictationConfig,
    pub telemetry: TelemetryConfig,
}

/// External capture tool invocation
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    /// Program name or path of the capture tool
    pub program: String,
    /// Input device driver passed as `-f` (dshow, avfoundation, pulse, ...)
    pub input_format: String,
    /// Preferred input device; `None` falls back to the first listed device
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: String,
    pub bitrate: String,
    /// Container format passed as the output `-f`
    pub container: String,
    /// File extension of recorded artifacts
    pub extension: String,
    /// How long to wait for the tool to finalize the file after `q`
    pub stop_timeout_secs: u64,
    /// Window after spawn in which an exit counts as a failed start
    pub startup_probe_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: String,
    pub max_age_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DictationConfig {
    /// Recognizer command; the recording path is appended as last argument
    pub recognizer: Vec<String>,
    /// Output command receiving the recognized text on stdin
    pub output: Vec<String>,
    /// Maximum recording duration in seconds (0 = unlimited)
    pub max_duration_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_path: String,
}

fn default_input_format() -> &'static str {
    if cfg!(target_os = "windows") {
        "dshow"
    } else if cfg!(target_os = "macos") {
        "avfoundation"
    } else {
        "pulse"
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_owned(),
            input_format: default_input_format().to_owned(),
            device: None,
            sample_rate: 48_000,
            channels: 1,
            codec: "libopus".to_owned(),
            bitrate: "48k".to_owned(),
            container: "ogg".to_owned(),
            extension: "ogg".to_owned(),
            stop_timeout_secs: 10,
            startup_probe_ms: 150,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: "~/.hotkey-dictation/recordings".to_owned(),
            max_age_ms: DEFAULT_MAX_AGE_MS,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: "~/.hotkey-dictation/dictation.log".to_owned(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"[capture]
program = "ffmpeg"
# Input driver: dshow (Windows), avfoundation (macOS) or pulse (Linux).
# pulse and alsa cannot list devices; without `device` they use "default".
# input_format = "dshow"
# device = "Microphone (USB Audio Device)"
sample_rate = 48000
channels = 1
codec = "libopus"
bitrate = "48k"
container = "ogg"
extension = "ogg"
stop_timeout_secs = 10
startup_probe_ms = 150

[storage]
dir = "~/.hotkey-dictation/recordings"
max_age_ms = 600000

[dictation]
# recognizer = ["my-stt", "--lang", "en"]
# output = ["wl-copy"]
max_duration_secs = 0

[telemetry]
enabled = true
log_path = "~/.hotkey-dictation/dictation.log"
"#;

impl Config {
    /// Load config from ~/.hotkey-dictation.toml, creating it on first run
    ///
    /// # Errors
    /// Returns error if the file cannot be created, read or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::from_toml(&contents)
    }

    /// Parse config from TOML text; missing fields take their defaults
    ///
    /// # Errors
    /// Returns error if the TOML is malformed
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// # Errors
    /// Returns error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.capture.program.trim().is_empty() {
            bail!("capture.program cannot be empty");
        }
        if self.capture.input_format.trim().is_empty() {
            bail!("capture.input_format cannot be empty");
        }
        if self.capture.sample_rate == 0 {
            bail!("capture.sample_rate must be > 0");
        }
        if self.capture.channels == 0 {
            bail!("capture.channels must be > 0");
        }
        if self.capture.extension.trim().is_empty() || self.capture.extension.contains('.') {
            bail!("capture.extension must be a bare extension like \"ogg\"");
        }
        if self.storage.dir.trim().is_empty() {
            bail!("storage.dir cannot be empty");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".hotkey-dictation.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }
}

impl CaptureConfig {
    /// Stop timeout as a `Duration`
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Startup probe window as a `Duration`
    pub const fn startup_probe(&self) -> Duration {
        Duration::from_millis(self.startup_probe_ms)
    }
}

impl StorageConfig {
    /// Recordings directory with `~` expanded
    ///
    /// # Errors
    /// Returns error if `~` is used and HOME is not set
    pub fn dir_path(&self) -> Result<PathBuf> {
        expand_path(&self.dir)
    }

    /// Retention window as a `Duration`
    pub const fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl DictationConfig {
    /// Recording limit, `None` when unlimited
    pub const fn max_duration(&self) -> Option<Duration> {
        if self.max_duration_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_duration_secs))
        }
    }
}

/// Expand ~ in paths to home directory
///
/// # Errors
/// Returns error if `path` starts with `~/` and HOME is not set
pub fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(stripped))
    } else {
        Ok(PathBuf::from(path))
    }
}
