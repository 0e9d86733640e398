// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine

use crate::format::FourCc;
use std::fmt;

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

/// Errors surfaced by the capture engine
///
/// Timeouts of the capture loop's readiness wait are deliberately not part
/// of this taxonomy: they are a normal, retried condition inside the loop
/// and never reach a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// Device path could not be opened or queried
    OpenFailed(String),
    /// Device lacks video capture or streaming I/O support
    UnsupportedCapability(&'static str),
    /// Requested format or frame size was rejected
    FormatNegotiation(String),
    /// Kernel buffer reservation or memory mapping failed
    BufferMap(String),
    /// Driver granted fewer buffers than the streaming engine can work with
    InsufficientBuffers { requested: u32, granted: u32 },
    /// Invalid streaming state transition (caller error, not retried)
    StreamTransition(&'static str),
    /// Unexpected kernel error other than a timeout; terminates the capture loop
    FatalDriver(String),
    /// Raw buffer length does not match the expected size for the negotiated geometry
    FrameLengthMismatch { expected: usize, actual: usize },
    /// Frame payload could not be decoded (e.g. corrupt compressed image)
    DecodeFailed(String),
    /// No decoder registered for the granted pixel format
    NoDecoderForFormat(FourCc),
    /// Session is not streaming or has shut down
    NoFrameAvailable,
    /// A control get/set failed, named by the numeric control id
    Control { id: u32, source: String },
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            CameraError::UnsupportedCapability(what) => {
                write!(f, "Device does not support {}", what)
            }
            CameraError::FormatNegotiation(msg) => {
                write!(f, "Format negotiation failed: {}", msg)
            }
            CameraError::BufferMap(msg) => write!(f, "Buffer mapping failed: {}", msg),
            CameraError::InsufficientBuffers { requested, granted } => write!(
                f,
                "Insufficient buffers: requested {}, driver granted {}",
                requested, granted
            ),
            CameraError::StreamTransition(msg) => {
                write!(f, "Invalid stream transition: {}", msg)
            }
            CameraError::FatalDriver(msg) => write!(f, "Driver error: {}", msg),
            CameraError::FrameLengthMismatch { expected, actual } => write!(
                f,
                "Wrong frame length (expected {}, read {})",
                expected, actual
            ),
            CameraError::DecodeFailed(msg) => write!(f, "Frame decode failed: {}", msg),
            CameraError::NoDecoderForFormat(fourcc) => {
                write!(f, "No decoder for format '{}'", fourcc)
            }
            CameraError::NoFrameAvailable => write!(f, "No frame available"),
            CameraError::Control { id, source } => {
                write!(f, "Control 0x{:08x}: {}", id, source)
            }
        }
    }
}

impl std::error::Error for CameraError {}
