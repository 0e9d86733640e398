// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format codes and frame size/rate models
//!
//! A V4L2 pixel format is a four-character code packed little-endian into a
//! `u32`. Frame sizes come in two shapes: discrete (a single width x height)
//! and stepwise (an inclusive min..max range with a step in each dimension).

use std::fmt;

/// Four-character pixel format code, e.g. `YUYV`, `MJPG`, `RGB3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub u32);

impl FourCc {
    /// Packed 4:2:2 YCbCr (two pixels per four bytes)
    pub const YUYV: FourCc = FourCc::from_bytes(*b"YUYV");
    /// Interleaved 3-byte red/green/blue
    pub const RGB3: FourCc = FourCc::from_bytes(*b"RGB3");
    /// Interleaved 3-byte blue/green/red
    pub const BGR3: FourCc = FourCc::from_bytes(*b"BGR3");
    /// Motion-JPEG (one compressed still image per frame)
    pub const MJPG: FourCc = FourCc::from_bytes(*b"MJPG");
    /// Plain JPEG payloads, reported by some drivers instead of MJPG
    pub const JPEG: FourCc = FourCc::from_bytes(*b"JPEG");

    /// Pack four characters into a format code
    pub const fn from_bytes(b: [u8; 4]) -> Self {
        FourCc(
            b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16 | (b[3] as u32) << 24,
        )
    }

    /// The four characters of the code
    pub const fn bytes(self) -> [u8; 4] {
        [
            self.0 as u8,
            (self.0 >> 8) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 24) as u8,
        ]
    }

    /// Parse a four-character string such as `"YUYV"`
    pub fn parse(s: &str) -> Option<FourCc> {
        let b = s.as_bytes();
        if b.len() != 4 {
            return None;
        }
        Some(FourCc::from_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.bytes() {
            if c.is_ascii_graphic() || c == b' ' {
                write!(f, "{}", c as char)?;
            } else {
                write!(f, ".")?;
            }
        }
        Ok(())
    }
}

/// A pixel format together with the driver's human-readable description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDesc {
    pub fourcc: FourCc,
    pub description: String,
}

/// Frame size supported by a capture device
///
/// Discrete sizes have `min == max` and `step == 0` in both dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSize {
    pub min_width: u32,
    pub max_width: u32,
    pub step_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub step_height: u32,
}

impl FrameSize {
    /// A fixed width x height size
    pub fn discrete(width: u32, height: u32) -> Self {
        FrameSize {
            min_width: width,
            max_width: width,
            step_width: 0,
            min_height: height,
            max_height: height,
            step_height: 0,
        }
    }

    /// A stepped range in each dimension
    pub fn stepwise(width: (u32, u32, u32), height: (u32, u32, u32)) -> Self {
        FrameSize {
            min_width: width.0,
            max_width: width.1,
            step_width: width.2,
            min_height: height.0,
            max_height: height.1,
            step_height: height.2,
        }
    }

    /// True when this is a single fixed size
    pub fn is_discrete(&self) -> bool {
        self.step_width == 0 && self.step_height == 0
    }

    /// Membership test: can this size produce the requested dimensions?
    ///
    /// Discrete sizes require an exact match. Stepwise sizes accept a value
    /// per dimension when `min <= v <= max` and `(v - min) % step == 0`.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        dimension_fits(self.min_width, self.max_width, self.step_width, width)
            && dimension_fits(self.min_height, self.max_height, self.step_height, height)
    }
}

fn dimension_fits(min: u32, max: u32, step: u32, value: u32) -> bool {
    if step == 0 {
        return value == min && value == max;
    }
    value >= min && value <= max && (value - min) % step == 0
}

impl fmt::Display for FrameSize {
    /// Renders `1280x720` for fixed sizes and
    /// `[320-640;160]x[240-480;160]` for stepwise sizes
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_discrete() {
            write!(f, "{}x{}", self.max_width, self.max_height)
        } else {
            write!(
                f,
                "[{}-{};{}]x[{}-{};{}]",
                self.min_width,
                self.max_width,
                self.step_width,
                self.min_height,
                self.max_height,
                self.step_height
            )
        }
    }
}

/// Frame rate as a time-per-frame fraction (numerator/denominator seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    pub num: u32,
    pub denom: u32,
}

impl FrameRate {
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Frames per second as a floating point value
    pub fn fps(&self) -> f64 {
        self.denom as f64 / self.num as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}fps", self.fps())
    }
}

/// Frame interval range supported for one format and size
///
/// Discrete intervals have matching min/max and zero steps, mirroring
/// [`FrameSize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameIntervalRange {
    pub min_num: u32,
    pub max_num: u32,
    pub step_num: u32,
    pub min_denom: u32,
    pub max_denom: u32,
    pub step_denom: u32,
}

/// Format geometry actually granted by the driver
///
/// Produced by negotiation; the driver may grant a different format, size,
/// stride or image size than requested, and this record is what the decoder
/// registry must be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    /// Bytes per image row including any driver padding (0 for compressed formats)
    pub stride: u32,
    /// Total bytes the driver writes per frame (0 when variable, e.g. MJPG)
    pub size_image: u32,
}
