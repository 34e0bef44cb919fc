/// Capture subprocess lifecycle
pub mod capture;
/// Device discovery and listing parser
pub mod devices;
/// Capture tool command lines
pub mod tool;

pub use capture::{Capture, CaptureError, CaptureProcess};
pub use devices::{AudioDevice, DeviceCatalog, DeviceError, DeviceSource};
pub use tool::{CaptureTool, Encoding, ToolUnavailable};
