// SPDX-License-Identifier: GPL-3.0-only

//! Camera device handle: identity, enumeration, negotiation, controls
//!
//! [`Camera`] wraps one opened capture node. Opening validates that the
//! node can actually stream video before anything else is attempted; a
//! metadata-only node on a multi-function device fails here rather than at
//! the first ioctl that would misbehave.

use crate::errors::{CameraError, CameraResult};
use crate::format::{FormatDesc, FourCc, FrameGeometry, FrameIntervalRange, FrameRate, FrameSize};
use crate::v4l2::sys::V4l2Device;
use crate::v4l2::{Capabilities, CaptureDevice, ControlInfo};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ===== Control ids =====

/// V4L2_CID_AUTO_WHITE_BALANCE
pub const CID_AUTO_WHITE_BALANCE: u32 = 0x0098090c;

/// An opened and capability-checked capture device
pub struct Camera {
    device: Arc<dyn CaptureDevice>,
    caps: Capabilities,
}

impl Camera {
    /// Open a device node such as `/dev/video0`
    pub fn open<P: AsRef<Path>>(path: P) -> CameraResult<Self> {
        let path = path.as_ref();
        let device = V4l2Device::open(path)?;
        let camera = Self::from_device(Arc::new(device))?;
        info!(
            path = %path.display(),
            card = %camera.caps.card,
            driver = %camera.caps.driver,
            "Opened capture device"
        );
        Ok(camera)
    }

    /// Wrap an already-opened kernel device, verifying capabilities
    pub(crate) fn from_device(device: Arc<dyn CaptureDevice>) -> CameraResult<Self> {
        let caps = device.capabilities()?;
        if !caps.supports_video_capture() {
            return Err(CameraError::UnsupportedCapability("video capture"));
        }
        if !caps.supports_streaming() {
            return Err(CameraError::UnsupportedCapability("streaming I/O"));
        }
        Ok(Camera { device, caps })
    }

    // ===== Identity =====

    /// Driver name, e.g. `uvcvideo`
    pub fn driver(&self) -> &str {
        &self.caps.driver
    }

    /// Human-readable device name
    pub fn card(&self) -> &str {
        &self.caps.card
    }

    /// Bus location, e.g. `usb-0000:00:14.0-3`
    pub fn bus_info(&self) -> &str {
        &self.caps.bus_info
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    // ===== Enumeration =====

    /// Pixel formats the device can produce
    pub fn formats(&self) -> CameraResult<Vec<FormatDesc>> {
        let mut formats = Vec::new();
        let mut index = 0;
        while let Some(desc) = self.device.enum_format(index)? {
            formats.push(desc);
            index += 1;
        }
        Ok(formats)
    }

    /// Frame sizes supported for a pixel format
    pub fn frame_sizes(&self, fourcc: FourCc) -> CameraResult<Vec<FrameSize>> {
        let mut sizes = Vec::new();
        let mut index = 0;
        while let Some(size) = self.device.enum_frame_size(fourcc, index)? {
            sizes.push(size);
            index += 1;
        }
        Ok(sizes)
    }

    /// Frame intervals supported for a format at a specific size
    pub fn frame_intervals(
        &self,
        fourcc: FourCc,
        width: u32,
        height: u32,
    ) -> CameraResult<Vec<FrameIntervalRange>> {
        let mut intervals = Vec::new();
        let mut index = 0;
        while let Some(range) = self
            .device
            .enum_frame_interval(fourcc, width, height, index)?
        {
            intervals.push(range);
            index += 1;
        }
        Ok(intervals)
    }

    // ===== Negotiation =====

    /// Negotiate a pixel format and frame size with the driver
    ///
    /// The requested size is checked against the driver's advertised sizes
    /// before the format is set, so an unsupported request fails cleanly
    /// instead of being silently adjusted. The driver still has the last
    /// word on stride and image size; the returned geometry is what it
    /// actually granted, and that geometry is what decoders must be built
    /// for.
    pub fn negotiate(&self, fourcc: FourCc, width: u32, height: u32) -> CameraResult<FrameGeometry> {
        if !self.formats()?.iter().any(|d| d.fourcc == fourcc) {
            return Err(CameraError::FormatNegotiation(format!(
                "format '{}' not supported by {}",
                fourcc, self.caps.card
            )));
        }
        let sizes = self.frame_sizes(fourcc)?;
        if !sizes.iter().any(|s| s.fits(width, height)) {
            return Err(CameraError::FormatNegotiation(format!(
                "{}x{} not supported for '{}' (available: {})",
                width,
                height,
                fourcc,
                sizes
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let granted = self.device.set_format(fourcc, width, height)?;
        if granted.fourcc != fourcc || granted.width != width || granted.height != height {
            warn!(
                requested = format_args!("'{}' {}x{}", fourcc, width, height),
                granted = format_args!(
                    "'{}' {}x{}",
                    granted.fourcc, granted.width, granted.height
                ),
                "Driver adjusted the requested format"
            );
        }
        debug!(
            format = %granted.fourcc,
            width = granted.width,
            height = granted.height,
            stride = granted.stride,
            size_image = granted.size_image,
            "Negotiated format"
        );
        Ok(granted)
    }

    // ===== Controls =====

    /// Enumerate the device's user-adjustable controls
    pub fn controls(&self) -> CameraResult<Vec<ControlInfo>> {
        let mut controls = Vec::new();
        let mut id = 0;
        while let Some(info) = self.device.next_control(id)? {
            id = info.id;
            controls.push(info);
        }
        Ok(controls)
    }

    /// Read a control value by numeric id
    pub fn get_control(&self, id: u32) -> CameraResult<i32> {
        self.device.get_control(id)
    }

    /// Write a control value by numeric id
    pub fn set_control(&self, id: u32, value: i32) -> CameraResult<()> {
        self.device.set_control(id, value)
    }

    /// Toggle automatic white balance
    pub fn set_auto_white_balance(&self, enabled: bool) -> CameraResult<()> {
        self.set_control(CID_AUTO_WHITE_BALANCE, enabled as i32)
    }

    // ===== Frame rate =====

    /// Current time-per-frame setting
    pub fn frame_rate(&self) -> CameraResult<FrameRate> {
        self.device.frame_rate()
    }

    /// Request a time-per-frame setting; the driver may pick the nearest
    /// supported rate
    pub fn set_frame_rate(&self, rate: FrameRate) -> CameraResult<()> {
        self.device.set_frame_rate(rate)?;
        let effective = self.device.frame_rate()?;
        if effective != rate {
            debug!(requested = %rate, effective = %effective, "Driver adjusted frame rate");
        }
        Ok(())
    }

    /// The underlying kernel device handle
    pub(crate) fn device(&self) -> Arc<dyn CaptureDevice> {
        Arc::clone(&self.device)
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Camera({} via {})", self.caps.card, self.caps.driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v4l2::fake::FakeDevice;
    use crate::v4l2::{V4L2_CAP_STREAMING, V4L2_CAP_VIDEO_CAPTURE};

    fn camera() -> (Arc<FakeDevice>, Camera) {
        let device = Arc::new(FakeDevice::new());
        let camera = Camera::from_device(device.clone()).unwrap();
        (device, camera)
    }

    #[test]
    fn test_rejects_non_capture_device() {
        let device = Arc::new(FakeDevice::new());
        device.set_capabilities(V4L2_CAP_STREAMING);
        assert_eq!(
            Camera::from_device(device).err(),
            Some(CameraError::UnsupportedCapability("video capture"))
        );
    }

    #[test]
    fn test_rejects_read_only_device() {
        let device = Arc::new(FakeDevice::new());
        device.set_capabilities(V4L2_CAP_VIDEO_CAPTURE);
        assert_eq!(
            Camera::from_device(device).err(),
            Some(CameraError::UnsupportedCapability("streaming I/O"))
        );
    }

    #[test]
    fn test_identity_fields() {
        let (_device, camera) = camera();
        assert_eq!(camera.driver(), "fake");
        assert_eq!(camera.card(), "Fake Capture Device");
        assert_eq!(camera.bus_info(), "platform:fake");
    }

    #[test]
    fn test_format_enumeration() {
        let (device, camera) = camera();
        device.set_formats(vec![
            FormatDesc {
                fourcc: FourCc::YUYV,
                description: "YUYV 4:2:2".to_string(),
            },
            FormatDesc {
                fourcc: FourCc::MJPG,
                description: "Motion-JPEG".to_string(),
            },
        ]);
        let formats = camera.formats().unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].fourcc, FourCc::YUYV);
        assert_eq!(formats[1].fourcc, FourCc::MJPG);
    }

    #[test]
    fn test_frame_size_enumeration() {
        let (device, camera) = camera();
        device.set_sizes(vec![
            FrameSize::discrete(1280, 720),
            FrameSize::discrete(640, 480),
        ]);
        let sizes = camera.frame_sizes(FourCc::YUYV).unwrap();
        assert_eq!(sizes, vec![
            FrameSize::discrete(1280, 720),
            FrameSize::discrete(640, 480),
        ]);
    }

    #[test]
    fn test_negotiate_surfaces_adjusted_grant() {
        let (device, camera) = camera();
        // Driver grants a padded stride and its own image size.
        device.set_grant_geometry(FrameGeometry {
            fourcc: FourCc::YUYV,
            width: 640,
            height: 480,
            stride: 1344,
            size_image: 1344 * 480,
        });
        let granted = camera.negotiate(FourCc::YUYV, 640, 480).unwrap();
        assert_eq!(granted.stride, 1344);
        assert_eq!(granted.size_image, 1344 * 480);
    }

    #[test]
    fn test_negotiate_discrete_size() {
        let (_device, camera) = camera();
        let granted = camera.negotiate(FourCc::YUYV, 640, 480).unwrap();
        assert_eq!(granted.width, 640);
        assert_eq!(granted.height, 480);
        assert_eq!(granted.size_image, 640 * 480 * 2);
    }

    #[test]
    fn test_negotiate_stepwise_size() {
        let (_device, camera) = camera();
        // On-step point inside the fake's stepwise range
        assert!(camera.negotiate(FourCc::YUYV, 320, 240).is_ok());
    }

    #[test]
    fn test_negotiate_rejects_unlisted_size() {
        let (_device, camera) = camera();
        let err = camera.negotiate(FourCc::YUYV, 1024, 768).unwrap_err();
        assert!(matches!(err, CameraError::FormatNegotiation(_)));
    }

    #[test]
    fn test_negotiate_rejects_unknown_format() {
        let (_device, camera) = camera();
        let err = camera.negotiate(FourCc::MJPG, 640, 480).unwrap_err();
        assert!(matches!(err, CameraError::FormatNegotiation(_)));
    }

    #[test]
    fn test_controls_walk() {
        let (_device, camera) = camera();
        let controls = camera.controls().unwrap();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].id, CID_AUTO_WHITE_BALANCE);
    }

    #[test]
    fn test_auto_white_balance_round_trip() {
        let (_device, camera) = camera();
        camera.set_auto_white_balance(false).unwrap();
        assert_eq!(camera.get_control(CID_AUTO_WHITE_BALANCE).unwrap(), 0);
        camera.set_auto_white_balance(true).unwrap();
        assert_eq!(camera.get_control(CID_AUTO_WHITE_BALANCE).unwrap(), 1);
    }

    #[test]
    fn test_frame_rate_round_trip() {
        let (_device, camera) = camera();
        camera.set_frame_rate(FrameRate::new(1, 15)).unwrap();
        assert_eq!(camera.frame_rate().unwrap(), FrameRate::new(1, 15));
    }

    #[test]
    fn test_set_frame_rate_when_driver_adjusts() {
        let (device, camera) = camera();
        // The driver picks its nearest supported rate instead of the
        // requested one; the set still succeeds and the effective rate
        // is what reads back.
        device.set_grant_frame_rate(FrameRate::new(1, 10));
        camera.set_frame_rate(FrameRate::new(1, 60)).unwrap();
        assert_eq!(camera.frame_rate().unwrap(), FrameRate::new(1, 10));
    }

    #[test]
    fn test_frame_interval_enumeration() {
        let (_device, camera) = camera();
        let intervals = camera.frame_intervals(FourCc::YUYV, 640, 480).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].min_denom, 30);
        assert_eq!(intervals[0].max_denom, 30);
        assert_eq!(intervals[0].min_num, 1);
    }
}
