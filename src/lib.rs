//! Hotkey Dictation - push-to-talk recorder feeding a speech recognizer
//!
//! This library exports the recording core (devices, capture subprocess,
//! session state machine, artifact storage) and the dictation workflow.

/// Recorded artifact storage and retention
pub mod artifacts;
/// Capture tool, device discovery and capture subprocess
pub mod audio;
/// Configuration management
pub mod config;
/// Trigger workflow and recognizer/output collaborators
pub mod dictation;
/// Recording session state machine
pub mod session;
/// Logging setup
pub mod telemetry;
