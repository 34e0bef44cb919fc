use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

use super::tool::{CaptureTool, ToolUnavailable};

/// `"<name>" (<kind>)` - declares a device; only `audio` opens a record
#[allow(clippy::expect_used)] // Static pattern, validated by tests
static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]*)"\s+\((\w+)\)"#).expect("valid declaration regex")
});

/// `Alternative name "<id>"` - last field of the pending record
#[allow(clippy::expect_used)] // Static pattern, validated by tests
static ALTERNATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Alternative name\s+"([^"]+)""#).expect("valid alternative name regex")
});

/// An audio input device reported by the capture tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    name: String,
    description: String,
    alternative_name: Option<String>,
}

impl AudioDevice {
    /// Only the catalog (and tests) create devices; `name` is never empty.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            alternative_name: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_alternative(mut self, alternative_name: impl Into<String>) -> Self {
        self.alternative_name = Some(alternative_name.into());
        self
    }

    /// Identifier accepted by the capture tool
    pub fn name(&self) -> &str {
        &self.name
    }

    /// User-facing label
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Secondary identifier some drivers expose
    pub fn alternative_name(&self) -> Option<&str> {
        self.alternative_name.as_deref()
    }

    /// Whether `id` names this device by primary or alternative name
    pub fn matches(&self, id: &str) -> bool {
        self.name == id || self.alternative_name.as_deref() == Some(id)
    }
}

/// Errors from device discovery
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Capture tool missing or broken
    #[error(transparent)]
    ToolUnavailable(#[from] ToolUnavailable),

    /// Listing succeeded but contained no audio devices
    #[error("no audio input devices found, check that a microphone is connected")]
    NoDevicesFound,

    /// Listing contained a line the grammar could not accept
    #[error("unexpected device listing at line {line_no}: {line:?}")]
    Parse {
        /// 1-based line number in the diagnostic output
        line_no: usize,
        /// Raw line for diagnosis
        line: String,
    },

    /// Diagnostic subprocess could not be run
    #[error("failed to run device listing: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse the capture tool's device listing
///
/// Grammar, applied line by line:
/// - `"<name>" (audio)` starts a device; a pending device is emitted first
/// - `"<name>" (video)` (or any other kind) emits the pending device and
///   opens nothing, so its alternative name is not attached to audio
/// - `Alternative name "<id>"` completes the pending device and emits it
/// - any other line is ignored
///
/// A device still pending at end of input is emitted too, so a last device
/// without an alternative name is kept.
///
/// # Errors
/// Returns [`DeviceError::Parse`] for a declaration with an empty name
pub fn parse_device_list(output: &str) -> Result<Vec<AudioDevice>, DeviceError> {
    let mut devices = Vec::new();
    let mut pending: Option<AudioDevice> = None;

    for (idx, line) in output.lines().enumerate() {
        if let Some(caps) = DECLARATION.captures(line) {
            devices.extend(pending.take());
            if caps.get(2).map(|m| m.as_str()) != Some("audio") {
                continue;
            }

            let name = caps.get(1).map_or("", |m| m.as_str());
            if name.trim().is_empty() {
                return Err(DeviceError::Parse {
                    line_no: idx + 1,
                    line: line.to_owned(),
                });
            }
            pending = Some(AudioDevice::new(name));
            continue;
        }

        if let Some(caps) = ALTERNATIVE.captures(line) {
            if let Some(mut device) = pending.take() {
                device.alternative_name = caps.get(1).map(|m| m.as_str().to_owned());
                devices.push(device);
            } else {
                debug!(line_no = idx + 1, "alternative name without device, ignored");
            }
        }
    }

    devices.extend(pending);
    Ok(devices)
}

/// Find a device by primary or alternative name
pub fn find_device<'a>(devices: &'a [AudioDevice], id: &str) -> Option<&'a AudioDevice> {
    devices.iter().find(|d| d.matches(id))
}

/// Pick a device from a 1-based number typed by the user
///
/// An empty answer selects the first (default) device.
pub fn pick_device<'a>(devices: &'a [AudioDevice], answer: &str) -> Option<&'a AudioDevice> {
    let answer = answer.trim();
    if answer.is_empty() {
        return devices.first();
    }
    let number: usize = answer.parse().ok()?;
    devices.get(number.checked_sub(1)?)
}

/// Source of audio input devices (enables testing via mocking)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// List devices in discovery order; never returns an empty list
    ///
    /// # Errors
    /// `ToolUnavailable`, `NoDevicesFound` or `Parse`
    async fn list_devices(&self) -> Result<Vec<AudioDevice>, DeviceError>;
}

/// Device discovery through the capture tool's listing mode
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    tool: CaptureTool,
}

impl DeviceCatalog {
    /// Catalog listing devices through `tool`
    pub const fn new(tool: CaptureTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl DeviceSource for DeviceCatalog {
    async fn list_devices(&self) -> Result<Vec<AudioDevice>, DeviceError> {
        self.tool.ensure_available().await?;

        // The listing is printed on stderr and the tool exits nonzero
        // because `dummy` is not a real input; the status is irrelevant.
        let output = self.tool.list_devices_command().output().await?;
        let listing = String::from_utf8_lossy(&output.stderr);

        let devices = parse_device_list(&listing)?;
        if devices.is_empty() {
            debug!(output = %listing, "device listing without audio devices");
            return Err(DeviceError::NoDevicesFound);
        }

        info!(
            count = devices.len(),
            default = devices[0].name(),
            "audio devices discovered"
        );
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_DEVICES: &str = r#"[dshow @ 000001c5b8a2e3c0] "Integrated Camera" (video)
[dshow @ 000001c5b8a2e3c0]   Alternative name "@device_pnp_\\?\usb#vid_04f2"
[dshow @ 000001c5b8a2e3c0] "Microphone Array (Realtek(R) Audio)" (audio)
[dshow @ 000001c5b8a2e3c0]   Alternative name "@device_cm_{33D9A762}\wave_{A1B2}"
[dshow @ 000001c5b8a2e3c0] "Headset Microphone (USB Audio)" (audio)
[dshow @ 000001c5b8a2e3c0]   Alternative name "@device_cm_{33D9A762}\wave_{C3D4}"
dummy: Immediate exit requested
"#;

    #[test]
    fn test_parse_two_devices_in_order() {
        let devices = parse_device_list(TWO_DEVICES).unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name(), "Microphone Array (Realtek(R) Audio)");
        assert_eq!(
            devices[0].alternative_name(),
            Some(r"@device_cm_{33D9A762}\wave_{A1B2}")
        );
        assert_eq!(devices[1].name(), "Headset Microphone (USB Audio)");
        assert_eq!(
            devices[1].alternative_name(),
            Some(r"@device_cm_{33D9A762}\wave_{C3D4}")
        );
    }

    #[test]
    fn test_description_equals_name() {
        let devices = parse_device_list(TWO_DEVICES).unwrap();
        assert_eq!(devices[0].description(), devices[0].name());
    }

    #[test]
    fn test_video_alternative_name_is_ignored() {
        // The camera's alternative name arrives before any audio declaration
        let devices = parse_device_list(TWO_DEVICES).unwrap();
        assert!(devices.iter().all(|d| d.name() != "Integrated Camera"));
    }

    #[test]
    fn test_device_without_alternative_flushed_by_next_declaration() {
        let output = "\"mic1\" (audio)\n\"mic2\" (audio)\n  Alternative name \"alt2\"\n";
        let devices = parse_device_list(output).unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name(), "mic1");
        assert_eq!(devices[0].alternative_name(), None);
        assert_eq!(devices[1].alternative_name(), Some("alt2"));
    }

    #[test]
    fn test_last_device_without_alternative_is_kept() {
        let output = "\"mic1\" (audio)\n  Alternative name \"alt1\"\n\"mic2\" (audio)\n";
        let devices = parse_device_list(output).unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].name(), "mic2");
        assert_eq!(devices[1].alternative_name(), None);
    }

    #[test]
    fn test_video_declaration_closes_pending_audio_device() {
        let output = "\"mic1\" (audio)\n\"Integrated Camera\" (video)\n  Alternative name \"@device_pnp_cam\"\n";
        let devices = parse_device_list(output).unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name(), "mic1");
        assert_eq!(devices[0].alternative_name(), None);
        assert!(find_device(&devices, "@device_pnp_cam").is_none());
    }

    #[test]
    fn test_empty_video_name_is_ignored() {
        let output = "\"\" (video)\n\"mic1\" (audio)\n";
        let devices = parse_device_list(output).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name(), "mic1");
    }

    #[test]
    fn test_no_devices_in_output() {
        let output = "ffmpeg version 6.1\n[dshow @ 0x1] Could not enumerate audio devices\n";
        assert!(parse_device_list(output).unwrap().is_empty());
        assert!(parse_device_list("").unwrap().is_empty());
    }

    #[test]
    fn test_empty_name_is_parse_error() {
        let output = "\"mic1\" (audio)\n\"\" (audio)\n";
        let err = parse_device_list(output).unwrap_err();
        match err {
            DeviceError::Parse { line_no, line } => {
                assert_eq!(line_no, 2);
                assert_eq!(line, "\"\" (audio)");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_windows_line_endings() {
        let output = "\"mic1\" (audio)\r\n  Alternative name \"alt1\"\r\n";
        let devices = parse_device_list(output).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name(), "mic1");
        assert_eq!(devices[0].alternative_name(), Some("alt1"));
    }

    #[test]
    fn test_find_device_by_either_name() {
        let devices = vec![
            AudioDevice::new("mic1").with_alternative("alt1"),
            AudioDevice::new("mic2"),
        ];
        assert_eq!(find_device(&devices, "mic2").map(AudioDevice::name), Some("mic2"));
        assert_eq!(find_device(&devices, "alt1").map(AudioDevice::name), Some("mic1"));
        assert!(find_device(&devices, "mic3").is_none());
    }

    #[test]
    fn test_pick_device_by_number() {
        let devices = vec![AudioDevice::new("mic1"), AudioDevice::new("mic2")];
        assert_eq!(pick_device(&devices, "").map(AudioDevice::name), Some("mic1"));
        assert_eq!(pick_device(&devices, " 2\n").map(AudioDevice::name), Some("mic2"));
        assert!(pick_device(&devices, "0").is_none());
        assert!(pick_device(&devices, "3").is_none());
        assert!(pick_device(&devices, "two").is_none());
        assert!(pick_device(&[], "").is_none());
    }

    #[tokio::test]
    async fn test_catalog_reports_missing_tool() {
        let catalog = DeviceCatalog::new(CaptureTool::new("/nonexistent/ffmpeg", "dshow"));
        let err = catalog.list_devices().await.unwrap_err();
        assert!(matches!(err, DeviceError::ToolUnavailable(_)));
    }
}
