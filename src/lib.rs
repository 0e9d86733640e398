// SPDX-License-Identifier: GPL-3.0-only

//! snapcam - streaming still capture from V4L2 devices
//!
//! This library drives a Video4Linux2 capture device with memory-mapped
//! streaming I/O and hands out individual decoded frames on demand. A
//! background loop keeps the kernel's buffer ring moving at sensor rate;
//! when nobody is waiting for a frame the freshly filled buffer goes
//! straight back to the driver, so a consumer always receives the newest
//! available image rather than a stale queued one.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`device`]: Device handle, enumeration and format negotiation
//! - [`capture`]: The capture session and its background loop
//! - [`pool`]: Kernel buffer ring with per-slot ownership tracking
//! - [`handoff`]: Single-slot rendezvous between loop and consumers
//! - [`decode`]: Decoder registry and the pixel-addressable [`Frame`]
//! - [`format`]: FourCC codes, frame sizes, rates and geometry
//! - [`v4l2`]: The kernel operations boundary (ioctl, mmap, select)
//! - [`config`]: Session tunables
//! - [`errors`]: The error taxonomy
//!
//! # Example
//!
//! ```ignore
//! let camera = snapcam::Camera::open("/dev/video0")?;
//! let session = snapcam::Session::new(
//!     camera,
//!     snapcam::DecoderRegistry::with_builtin_decoders(),
//!     snapcam::CaptureConfig::default(),
//! );
//! session.configure(snapcam::FourCc::YUYV, 1280, 720)?;
//! session.start_streaming()?;
//! let mut frame = session.get_frame()?;
//! let pixel = frame.pixel(0, 0);
//! frame.release();
//! session.stop_streaming()?;
//! ```

pub mod capture;
pub mod config;
pub mod decode;
pub mod device;
pub mod errors;
pub mod format;
pub mod handoff;
pub mod pool;
pub mod v4l2;

// Re-export the consumer-facing surface
pub use capture::Session;
pub use config::CaptureConfig;
pub use decode::{DecoderFactory, DecoderRegistry, Frame, FrameBytes, Pixel};
pub use device::Camera;
pub use errors::{CameraError, CameraResult};
pub use format::{FormatDesc, FourCc, FrameGeometry, FrameIntervalRange, FrameRate, FrameSize};
