// SPDX-License-Identifier: GPL-3.0-only

//! Kernel operations boundary for V4L2 capture devices
//!
//! The capture engine never touches kernel struct layouts directly; it
//! depends only on the [`CaptureDevice`] trait defined here. The real
//! ioctl-backed implementation lives in [`sys`]; tests use a scripted fake.

pub mod sys;

#[cfg(test)]
pub(crate) mod fake;

use crate::errors::CameraResult;
use crate::format::{
    FormatDesc, FourCc, FrameGeometry, FrameIntervalRange, FrameRate, FrameSize,
};
use std::ops::Deref;
use std::time::Duration;

/// Single-planar video capture capability flag
pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x00000001;
/// Streaming I/O (memory-mapped buffer) capability flag
pub const V4L2_CAP_STREAMING: u32 = 0x04000000;

/// Device identity and capability flags from `VIDIOC_QUERYCAP`
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub capabilities: u32,
    pub device_caps: u32,
}

impl Capabilities {
    /// Flags that apply to the opened node (`device_caps` when reported)
    pub fn effective(&self) -> u32 {
        if self.device_caps != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    pub fn supports_video_capture(&self) -> bool {
        self.effective() & V4L2_CAP_VIDEO_CAPTURE != 0
    }

    pub fn supports_streaming(&self) -> bool {
        self.effective() & V4L2_CAP_STREAMING != 0
    }
}

/// V4L2 control value type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Integer,
    Boolean,
    Menu,
}

/// Metadata for one device control
#[derive(Debug, Clone)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub kind: ControlKind,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
}

/// Outcome of a bounded readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// A buffer is ready to dequeue
    Ready,
    /// The wait expired; normal and retried by the capture loop
    TimedOut,
}

/// The narrow set of kernel operations the capture engine consumes
///
/// Implementations must be safe to share between the capture loop thread
/// and caller threads. Enumeration operations are indexed and return
/// `Ok(None)` when the index runs past the end of the driver's table.
pub trait CaptureDevice: Send + Sync {
    /// Query device identity and capability flags
    fn capabilities(&self) -> CameraResult<Capabilities>;

    /// Enumerate the supported pixel format at `index`
    fn enum_format(&self, index: u32) -> CameraResult<Option<FormatDesc>>;

    /// Enumerate the supported frame size at `index` for a format
    fn enum_frame_size(&self, fourcc: FourCc, index: u32) -> CameraResult<Option<FrameSize>>;

    /// Enumerate the supported frame interval at `index` for a format and size
    fn enum_frame_interval(
        &self,
        fourcc: FourCc,
        width: u32,
        height: u32,
        index: u32,
    ) -> CameraResult<Option<FrameIntervalRange>>;

    /// Request a format and size; returns what the driver actually granted
    fn set_format(&self, fourcc: FourCc, width: u32, height: u32) -> CameraResult<FrameGeometry>;

    /// Reserve kernel buffers; the returned granted count is authoritative
    fn request_buffers(&self, count: u32) -> CameraResult<u32>;

    /// Map the buffer at `index` into process memory
    fn map_buffer(&self, index: u32) -> CameraResult<MappedRegion>;

    /// Submit a buffer back to the kernel queue
    fn queue_buffer(&self, index: u32) -> CameraResult<()>;

    /// Take the next ready buffer: `(index, bytes_used)`, or `None` if the
    /// kernel has nothing ready (non-blocking would-block case)
    fn dequeue_buffer(&self) -> CameraResult<Option<(u32, u32)>>;

    /// Start the capture stream
    fn stream_on(&self) -> CameraResult<()>;

    /// Stop the capture stream
    fn stream_off(&self) -> CameraResult<()>;

    /// Walk the device's control table: the first enabled control with an id
    /// greater than `id`, or `None` at the end of the table
    fn next_control(&self, id: u32) -> CameraResult<Option<ControlInfo>>;

    /// Read a control value by numeric id
    fn get_control(&self, id: u32) -> CameraResult<i32>;

    /// Write a control value by numeric id
    fn set_control(&self, id: u32, value: i32) -> CameraResult<()>;

    /// Read the current time-per-frame setting
    fn frame_rate(&self) -> CameraResult<FrameRate>;

    /// Request a time-per-frame setting (the driver may adjust it)
    fn set_frame_rate(&self, rate: FrameRate) -> CameraResult<()>;

    /// Block until a buffer is ready or the timeout expires
    fn wait_readable(&self, timeout: Duration) -> CameraResult<ReadyState>;
}

enum Backing {
    /// Mapped device memory, unmapped on drop
    Mmap,
    /// Process heap, used by tests and synthetic sources
    Heap(#[allow(dead_code)] Box<[u8]>),
}

/// A fixed-length byte region shared with the device driver
///
/// Contents are only meaningful while the owning buffer slot is User-owned;
/// the pool's ownership protocol guarantees the driver is not writing while
/// a consumer reads.
pub struct MappedRegion {
    ptr: *mut u8,
    len: usize,
    backing: Backing,
}

// Readers only access the region while the slot is User-owned, which the
// handoff protocol serialises against driver writes.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Wrap an mmap'd device region. `ptr` must come from a successful
    /// `mmap` of `len` bytes and stay valid until drop.
    pub(crate) unsafe fn from_mmap(ptr: *mut u8, len: usize) -> Self {
        MappedRegion {
            ptr,
            len,
            backing: Backing::Mmap,
        }
    }

    /// A heap-backed region, for tests and synthetic frame sources
    pub fn from_vec(data: Vec<u8>) -> Self {
        let mut data = data.into_boxed_slice();
        let ptr = data.as_mut_ptr();
        let len = data.len();
        MappedRegion {
            ptr,
            len,
            backing: Backing::Heap(data),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for MappedRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Backing::Mmap = self.backing {
            let ret = unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
            if ret != 0 {
                tracing::warn!(
                    len = self.len,
                    errno = ?std::io::Error::last_os_error(),
                    "munmap failed for capture buffer"
                );
            }
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backing {
            Backing::Mmap => "mmap",
            Backing::Heap(_) => "heap",
        };
        write!(f, "MappedRegion({} bytes, {})", self.len, kind)
    }
}
