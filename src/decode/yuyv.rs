// SPDX-License-Identifier: GPL-3.0-only

//! Packed 4:2:2 YCbCr decoder (`YUYV`)
//!
//! Four bytes carry two horizontally adjacent pixels: `Y0 Cb Y1 Cr`. Both
//! pixels of a pair share the Cb/Cr chroma samples, so the accessor
//! addresses the pair base at `stride * y + (x & !1) * 2` and picks the
//! luma byte by the parity of `x`.

use super::{DecodeFn, DecoderFactory, Frame, PixelAccessor, expect_length};
use crate::format::FrameGeometry;
use std::sync::Arc;

/// Decoder factory for `YUYV`
pub fn yuyv422_factory() -> DecoderFactory {
    Arc::new(|geometry: &FrameGeometry| -> DecodeFn {
        let width = geometry.width;
        let height = geometry.height;
        let stride = if geometry.stride != 0 {
            geometry.stride as usize
        } else {
            width as usize * 2
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
                PixelAccessor::PackedYuv422 {
                    data: bytes,
                    stride,
                },
                release,
            ))
        })
    })
}
