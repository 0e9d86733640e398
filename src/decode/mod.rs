// SPDX-License-Identifier: GPL-3.0-only

//! Decoder registry and the Frame abstraction
//!
//! A decoder turns one raw capture buffer into a [`Frame`]: a typed,
//! pixel-addressable view with a release obligation. Decoders are built by
//! per-format factories configured once with the *granted* geometry; the
//! registry maps a FourCC to its factory and is owned by the session that
//! uses it rather than living in process-global state.

pub mod jpeg;
pub mod rgb;
pub mod yuyv;

use crate::errors::{CameraError, CameraResult};
use crate::format::{FourCc, FrameGeometry};
use crate::v4l2::MappedRegion;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// One-shot hook that returns the underlying buffer slot to the kernel
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Decode one raw buffer into a frame
///
/// On any failure the implementation must invoke the release hook before
/// returning the error — a kernel buffer is never leaked by a failed
/// decode.
pub type DecodeFn = Arc<dyn Fn(FrameBytes, ReleaseFn) -> CameraResult<Frame> + Send + Sync>;

/// Build a decode function for one negotiated geometry
pub type DecoderFactory = Arc<dyn Fn(&FrameGeometry) -> DecodeFn + Send + Sync>;

/// The valid bytes of one captured frame
///
/// A cheap view over the slot's mapped region, truncated to the byte count
/// the driver reported for this capture.
#[derive(Clone)]
pub struct FrameBytes {
    region: Arc<MappedRegion>,
    len: usize,
}

impl FrameBytes {
    /// View `len` valid bytes of a mapped slot
    pub fn new(region: Arc<MappedRegion>, len: usize) -> Self {
        let len = len.min(region.len());
        FrameBytes { region, len }
    }

    /// A heap-backed payload, for tests and synthetic sources
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        FrameBytes {
            region: Arc::new(MappedRegion::from_vec(data)),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for FrameBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.region[..self.len]
    }
}

/// A single pixel value in the frame's native color space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pixel {
    Rgb { r: u8, g: u8, b: u8 },
    YCbCr { y: u8, cb: u8, cr: u8 },
}

impl Pixel {
    /// Convert to 8-bit RGB (BT.601 full-range for YCbCr values)
    pub fn to_rgb(self) -> (u8, u8, u8) {
        match self {
            Pixel::Rgb { r, g, b } => (r, g, b),
            Pixel::YCbCr { y, cb, cr } => {
                let y = y as f32;
                let cb = cb as f32 - 128.0;
                let cr = cr as f32 - 128.0;
                let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
                (
                    clamp(y + 1.402 * cr),
                    clamp(y - 0.344136 * cb - 0.714136 * cr),
                    clamp(y + 1.772 * cb),
                )
            }
        }
    }
}

/// How a frame's pixels are addressed
pub(crate) enum PixelAccessor {
    /// Interleaved 3-byte samples; `offsets` give the byte position of
    /// r, g, b within each sample
    Interleaved {
        data: FrameBytes,
        stride: usize,
        offsets: [usize; 3],
    },
    /// Packed 4:2:2 luma/chroma pairs; chroma is shared across each
    /// adjacent pixel pair
    PackedYuv422 { data: FrameBytes, stride: usize },
    /// Fully decoded still image (compressed wire formats)
    Image(image::RgbImage),
}

/// A decoded, pixel-addressable view over one capture buffer
///
/// The frame borrows a kernel buffer slot; the caller must call
/// [`Frame::release`] when done so the slot can be re-enqueued. Release is
/// idempotent. Dropping an unreleased frame still releases the slot as a
/// leak backstop, but correctness must not depend on drop timing.
pub struct Frame {
    width: u32,
    height: u32,
    accessor: PixelAccessor,
    release: Option<ReleaseFn>,
}

impl Frame {
    pub(crate) fn new(
        width: u32,
        height: u32,
        accessor: PixelAccessor,
        release: ReleaseFn,
    ) -> Self {
        Frame {
            width,
            height,
            accessor,
            release: Some(release),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read the pixel at `(x, y)`
    ///
    /// # Panics
    ///
    /// Panics when the coordinates are outside `width x height`.
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        assert!(
            x < self.width && y < self.height,
            "pixel ({}, {}) out of bounds for {}x{} frame",
            x,
            y,
            self.width,
            self.height
        );
        let (x, y) = (x as usize, y as usize);
        match &self.accessor {
            PixelAccessor::Interleaved {
                data,
                stride,
                offsets,
            } => {
                let i = stride * y + x * 3;
                Pixel::Rgb {
                    r: data[i + offsets[0]],
                    g: data[i + offsets[1]],
                    b: data[i + offsets[2]],
                }
            }
            PixelAccessor::PackedYuv422 { data, stride } => {
                // Two pixels share one Cb/Cr pair: Y0 Cb Y1 Cr
                let i = stride * y + (x & !1) * 2;
                let luma = if x & 1 == 0 { data[i] } else { data[i + 2] };
                Pixel::YCbCr {
                    y: luma,
                    cb: data[i + 1],
                    cr: data[i + 3],
                }
            }
            PixelAccessor::Image(img) => {
                let p = img.get_pixel(x as u32, y as u32);
                Pixel::Rgb {
                    r: p[0],
                    g: p[1],
                    b: p[2],
                }
            }
        }
    }

    /// Return the underlying buffer slot to the kernel
    ///
    /// Calling release a second time has no effect.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.release.is_some() {
            warn!(
                width = self.width,
                height = self.height,
                "Frame dropped without release(); releasing buffer slot now"
            );
            self.release();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame({}x{}, released: {})",
            self.width,
            self.height,
            self.is_released()
        )
    }
}

/// Validate the payload length, releasing the buffer on mismatch
///
/// Returns the release hook unconsumed so the caller can hand it to the
/// frame it builds.
pub(crate) fn expect_length(
    bytes: &FrameBytes,
    expected: usize,
    release: ReleaseFn,
) -> CameraResult<ReleaseFn> {
    if bytes.len() != expected {
        release();
        return Err(CameraError::FrameLengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(release)
}

/// Table of decoder factories keyed by pixel format
///
/// Populate the registry before starting a session; lookup is the only
/// operation used while streaming.
pub struct DecoderRegistry {
    factories: HashMap<FourCc, DecoderFactory>,
}

impl DecoderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        DecoderRegistry {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-populated with the built-in decoders:
    /// RGB3, BGR3, YUYV, and MJPG/JPEG
    pub fn with_builtin_decoders() -> Self {
        let mut registry = Self::new();
        registry.register(FourCc::RGB3, rgb::rgb3_factory());
        registry.register(FourCc::BGR3, rgb::bgr3_factory());
        registry.register(FourCc::YUYV, yuyv::yuyv422_factory());
        registry.register(FourCc::MJPG, jpeg::jpeg_factory());
        registry.register(FourCc::JPEG, jpeg::jpeg_factory());
        registry
    }

    /// Bind a factory to a format; re-registering a tag overwrites the
    /// previous handler (one handler per format)
    pub fn register(&mut self, fourcc: FourCc, factory: DecoderFactory) {
        if self.factories.insert(fourcc, factory).is_some() {
            debug!(format = %fourcc, "Replaced decoder registration");
        }
    }

    /// Look up the factory for a format
    pub fn lookup(&self, fourcc: FourCc) -> CameraResult<DecoderFactory> {
        self.factories
            .get(&fourcc)
            .cloned()
            .ok_or(CameraError::NoDecoderForFormat(fourcc))
    }

    /// Formats with a registered decoder
    pub fn formats(&self) -> Vec<FourCc> {
        let mut formats: Vec<FourCc> = self.factories.keys().copied().collect();
        formats.sort();
        formats
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin_decoders()
    }
}
