// SPDX-License-Identifier: GPL-3.0-only

//! Interleaved 3-byte RGB decoders
//!
//! `RGB3` and `BGR3` differ only in channel order, so both are built from
//! one generic interleaved factory configured with per-channel byte
//! offsets.

use super::{DecodeFn, DecoderFactory, Frame, PixelAccessor, expect_length};
use crate::format::FrameGeometry;
use std::sync::Arc;

/// Decoder factory for `RGB3` (red first)
pub fn rgb3_factory() -> DecoderFactory {
    interleaved_factory([0, 1, 2])
}

/// Decoder factory for `BGR3` (blue first)
pub fn bgr3_factory() -> DecoderFactory {
    interleaved_factory([2, 1, 0])
}

/// Generic interleaved 3-byte factory; `offsets` are the byte positions of
/// r, g, b within one pixel sample
pub fn interleaved_factory(offsets: [usize; 3]) -> DecoderFactory {
    Arc::new(move |geometry: &FrameGeometry| -> DecodeFn {
        let width = geometry.width;
        let height = geometry.height;
        let stride = if geometry.stride != 0 {
            geometry.stride as usize
        } else {
            width as usize * 3
        };
        let expected = if geometry.size_image != 0 {
            geometry.size_image as usize
        } else {
            stride * height as usize
        };
        Arc::new(move |bytes, release| {
            let release = expect_length(&bytes, expected, release)?;
            Ok(Frame::new(
                width,
                height,
                PixelAccessor::Interleaved {
                    data: bytes,
                    stride,
                    offsets,
                },
                release,
            ))
        })
    })
}
