// SPDX-License-Identifier: GPL-3.0-only

//! Embedded JPEG decoder (`MJPG`/`JPEG`)
//!
//! Each capture buffer carries one complete compressed still image, so the
//! payload length is variable and there is no up-front size check; the
//! image decoder itself is the validator. The buffer slot is held until
//! the frame is released, like every other format.

use super::{DecodeFn, DecoderFactory, Frame, PixelAccessor};
use crate::errors::CameraError;
use crate::format::FrameGeometry;
use image::ImageFormat;
use std::sync::Arc;
use tracing::debug;

/// Decoder factory for `MJPG` and `JPEG`
pub fn jpeg_factory() -> DecoderFactory {
    Arc::new(|geometry: &FrameGeometry| -> DecodeFn {
        let expected_width = geometry.width;
        let expected_height = geometry.height;
        Arc::new(move |bytes, release| {
            let decoded = match image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg) {
                Ok(img) => img.into_rgb8(),
                Err(e) => {
                    release();
                    return Err(CameraError::DecodeFailed(format!("jpeg: {}", e)));
                }
            };
            if decoded.width() != expected_width || decoded.height() != expected_height {
                debug!(
                    expected = format_args!("{}x{}", expected_width, expected_height),
                    decoded = format_args!("{}x{}", decoded.width(), decoded.height()),
                    "JPEG dimensions differ from negotiated geometry"
                );
            }
            let (width, height) = (decoded.width(), decoded.height());
            Ok(Frame::new(
                width,
                height,
                PixelAccessor::Image(decoded),
                release,
            ))
        })
    })
}
