use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactStore, StoreError};
use crate::audio::{Capture, CaptureError, DeviceError, DeviceSource};
use crate::config::DEFAULT_MAX_AGE_MS;

/// Recording session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No capture running
    Idle,
    /// A capture is writing the session's output path
    Recording,
}

/// Errors from session transitions
#[derive(Debug, Error)]
pub enum SessionError {
    /// No device given, none selected, and the catalog is empty
    #[error("no audio device selected and none available")]
    NoDeviceSelected,

    /// `start` while recording
    #[error("recording already in progress (writing {})", output_path.display())]
    AlreadyRecording {
        /// File of the recording in progress
        output_path: PathBuf,
    },

    /// `stop` while idle
    #[error("no recording in progress")]
    NotRecording,

    /// Device discovery failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Capture subprocess failed
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Output path could not be allocated
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// The recording in progress
#[derive(Debug)]
struct ActiveRecording {
    device: String,
    output_path: PathBuf,
    started_at: Instant,
}

/// Single owner of the recording lifecycle
///
/// Coordinates device selection, the capture subprocess and artifact paths.
/// `Recording` holds exactly when the capture was started successfully and
/// its output path is known; any `stop` returns the session to `Idle`.
pub struct RecordingSession<D, C> {
    devices: D,
    capture: C,
    store: ArtifactStore,
    max_age: Duration,
    selected_device: Option<String>,
    active: Option<ActiveRecording>,
}

impl<D: DeviceSource, C: Capture> RecordingSession<D, C> {
    /// Idle session with the default retention window and no selected device
    pub fn new(devices: D, capture: C, store: ArtifactStore) -> Self {
        Self {
            devices,
            capture,
            store,
            max_age: Duration::from_millis(DEFAULT_MAX_AGE_MS),
            selected_device: None,
            active: None,
        }
    }

    /// Retention window used by the sweep before each recording
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Current state
    pub const fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    /// Whether a recording is in progress
    pub const fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// File being written, while recording
    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.output_path.as_path())
    }

    /// Device of the recording in progress
    pub fn recording_device(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.device.as_str())
    }

    /// When the recording in progress started
    pub fn started_at(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.started_at)
    }

    /// Remember the preferred device for `start(None)`
    pub fn select_device(&mut self, name: impl Into<String>) {
        let name = name.into();
        info!(device = %name, "audio device selected");
        self.selected_device = Some(name);
    }

    /// Device remembered by [`Self::select_device`]
    pub fn selected_device(&self) -> Option<&str> {
        self.selected_device.as_deref()
    }

    /// Artifact storage backing this session
    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Device source used for fallback selection
    pub const fn devices(&self) -> &D {
        &self.devices
    }

    /// Start recording; returns the path the artifact is written to
    ///
    /// Device order: `device`, then the selected device, then the first
    /// device the catalog lists. Expired artifacts are swept before the new
    /// path is allocated, which is safe because nothing is being written.
    ///
    /// # Errors
    /// `AlreadyRecording`, `NoDeviceSelected`, or a propagated device,
    /// storage or capture error. On any error the session stays `Idle`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self, device: Option<&str>) -> Result<PathBuf, SessionError> {
        if let Some(active) = &self.active {
            return Err(SessionError::AlreadyRecording {
                output_path: active.output_path.clone(),
            });
        }

        let device = self.resolve_device(device).await?;

        let swept = self.store.sweep_expired(self.max_age);
        if swept > 0 {
            debug!(swept, "expired recordings removed before start");
        }

        let output_path = self.store.allocate_path()?;
        self.capture.start(&device, &output_path).await?;

        info!(
            device = %device,
            path = %output_path.display(),
            "recording started"
        );

        self.active = Some(ActiveRecording {
            device,
            output_path: output_path.clone(),
            started_at: Instant::now(),
        });
        Ok(output_path)
    }

    /// Stop recording; returns the finalized artifact
    ///
    /// Completes only after the capture subprocess has exited. The session
    /// is `Idle` afterwards even when the capture reports a failure.
    ///
    /// # Errors
    /// `NotRecording`, or the capture error from finalizing
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<PathBuf, SessionError> {
        let active = self.active.take().ok_or(SessionError::NotRecording)?;

        match self.capture.stop().await {
            Ok(()) => {
                info!(
                    duration_ms = active.started_at.elapsed().as_millis(),
                    path = %active.output_path.display(),
                    "recording stopped"
                );
                Ok(active.output_path)
            }
            Err(e) => {
                warn!(path = %active.output_path.display(), "recording failed to finalize: {}", e);
                Err(e.into())
            }
        }
    }

    async fn resolve_device(&self, explicit: Option<&str>) -> Result<String, SessionError> {
        let preferred = explicit
            .or(self.selected_device.as_deref())
            .filter(|name| !name.trim().is_empty());
        if let Some(name) = preferred {
            return Ok(name.to_owned());
        }

        match self.devices.list_devices().await {
            Ok(devices) => {
                let first = devices
                    .into_iter()
                    .next()
                    .ok_or(SessionError::NoDeviceSelected)?;
                info!(device = first.name(), "no device selected, using first available");
                Ok(first.name().to_owned())
            }
            Err(DeviceError::NoDevicesFound) => Err(SessionError::NoDeviceSelected),
            Err(e) => Err(e.into()),
        }
    }
}
