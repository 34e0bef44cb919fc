use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use crate::config::CaptureConfig;

const INSTALL_GUIDANCE: &str = "Install FFmpeg: download it from https://ffmpeg.org/download.html, \
unpack the archive and add its bin directory to PATH (or set capture.program to the full path)";

/// The capture tool could not be invoked
#[derive(Debug, Error)]
#[error("capture tool `{program}` is not available: {reason}\n{guidance}", guidance = INSTALL_GUIDANCE)]
pub struct ToolUnavailable {
    /// Program that was probed
    pub program: String,
    /// Why the probe failed
    pub reason: String,
}

/// Encoding parameters for recorded artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    /// Output sample rate in Hz (`-ar`)
    pub sample_rate: u32,
    /// Output channel count (`-ac`)
    pub channels: u16,
    /// Audio codec (`-acodec`)
    pub codec: String,
    /// Target bitrate (`-b:a`)
    pub bitrate: String,
    /// Output container (`-f`)
    pub container: String,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            codec: "libopus".to_owned(),
            bitrate: "48k".to_owned(),
            container: "ogg".to_owned(),
        }
    }
}

/// Command-line knowledge of the external capture tool (ffmpeg)
///
/// Everything that depends on the tool's argument syntax lives here, so the
/// catalog and the capture process only deal with ready-made commands.
#[derive(Debug, Clone)]
pub struct CaptureTool {
    program: PathBuf,
    input_format: String,
    encoding: Encoding,
}

/// Input drivers without a device-listing mode
const UNLISTED_INPUTS: &[&str] = &["pulse", "alsa"];

impl CaptureTool {
    /// Tool at `program` reading from the `input_format` driver with default encoding
    pub fn new(program: impl Into<PathBuf>, input_format: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            input_format: input_format.into(),
            encoding: Encoding::default(),
        }
    }

    /// Override the output encoding
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Tool described by the `[capture]` section
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(&config.program, &config.input_format).with_encoding(Encoding {
            sample_rate: config.sample_rate,
            channels: config.channels,
            codec: config.codec.clone(),
            bitrate: config.bitrate.clone(),
            container: config.container.clone(),
        })
    }

    /// Program name or path
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Input driver passed as `-f`
    pub fn input_format(&self) -> &str {
        &self.input_format
    }

    /// Output encoding
    pub const fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Device to use when the driver cannot list its devices
    ///
    /// `None` means the driver supports `-list_devices` and the catalog
    /// should be asked instead.
    pub fn unlisted_default_device(&self) -> Option<&'static str> {
        UNLISTED_INPUTS
            .contains(&self.input_format.as_str())
            .then_some("default")
    }

    /// Check that the tool can be executed by running `<program> -version`
    ///
    /// # Errors
    /// Returns [`ToolUnavailable`] if the program cannot be spawned or exits nonzero
    pub async fn ensure_available(&self) -> Result<(), ToolUnavailable> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(self.unavailable(format!("`-version` exited with {}", output.status)))
        }
    }

    fn unavailable(&self, reason: String) -> ToolUnavailable {
        ToolUnavailable {
            program: self.program.display().to_string(),
            reason,
        }
    }

    /// Input argument naming `device` for the configured input driver
    pub fn input_spec(&self, device: &str) -> String {
        match self.input_format.as_str() {
            "dshow" => format!("audio={device}"),
            "avfoundation" => format!(":{device}"),
            _ => device.to_owned(),
        }
    }

    /// Arguments of the device-listing diagnostic mode
    pub fn list_devices_args(&self) -> Vec<OsString> {
        [
            "-hide_banner",
            "-list_devices",
            "true",
            "-f",
            self.input_format.as_str(),
            "-i",
            "dummy",
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }

    /// Arguments recording `device` into `output_path`
    pub fn record_args(&self, device: &str, output_path: &Path) -> Vec<OsString> {
        let enc = &self.encoding;
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            self.input_format.as_str(),
            "-i",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        args.push(self.input_spec(device).into());
        args.extend(
            [
                "-ac".to_owned(),
                enc.channels.to_string(),
                "-ar".to_owned(),
                enc.sample_rate.to_string(),
                "-acodec".to_owned(),
                enc.codec.clone(),
                "-b:a".to_owned(),
                enc.bitrate.clone(),
                "-f".to_owned(),
                enc.container.clone(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output_path.as_os_str().to_owned());
        args
    }

    /// Command for the device-listing diagnostic mode (listing is on stderr)
    pub fn list_devices_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.list_devices_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    /// Command recording `device` into `output_path`
    ///
    /// stdin is the control channel (`q` finalizes the file), stderr carries diagnostics.
    pub fn record_command(&self, device: &str, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.record_args(device, output_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
