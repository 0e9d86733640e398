// SPDX-License-Identifier: GPL-3.0-only

//! Raw V4L2 ioctl implementation of [`CaptureDevice`]
//!
//! Struct layouts and constants are derived from `videodev2.h`. See
//! <https://www.kernel.org/doc/html/latest/userspace-api/media/v4l/videodev.html>
//! for the authoritative reference. Everything unsafe is confined to this
//! file; callers only see the trait.

use super::{Capabilities, CaptureDevice, ControlInfo, ControlKind, MappedRegion, ReadyState};
use crate::errors::{CameraError, CameraResult};
use crate::format::{
    FormatDesc, FourCc, FrameGeometry, FrameIntervalRange, FrameRate, FrameSize,
};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

// ===== V4L2 Enum Constants =====

const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_FIELD_ANY: u32 = 0;

const V4L2_FRMSIZE_TYPE_DISCRETE: u32 = 1;
const V4L2_FRMIVAL_TYPE_DISCRETE: u32 = 1;

const V4L2_CTRL_TYPE_INTEGER: u32 = 1;
const V4L2_CTRL_TYPE_BOOLEAN: u32 = 2;
const V4L2_CTRL_TYPE_MENU: u32 = 3;
const V4L2_CTRL_TYPE_INTEGER64: u32 = 5;

const V4L2_CTRL_FLAG_DISABLED: u32 = 0x00000001;
const V4L2_CTRL_FLAG_NEXT_CTRL: u32 = 0x80000000;

// ===== V4L2 ioctl Numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr
// where dir: 2=READ, 1=WRITE, 3=READ|WRITE, and size is the struct size
// on 64-bit Linux.

/// Query capabilities (v4l2_capability: 104 bytes)
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;
/// Enumerate pixel formats (v4l2_fmtdesc: 64 bytes)
const VIDIOC_ENUM_FMT: libc::c_ulong = 0xC0405602;
/// Set image format (v4l2_format: 208 bytes)
const VIDIOC_S_FMT: libc::c_ulong = 0xC0D05605;
/// Request buffers (v4l2_requestbuffers: 20 bytes)
const VIDIOC_REQBUFS: libc::c_ulong = 0xC0145608;
/// Query buffer (v4l2_buffer: 88 bytes)
const VIDIOC_QUERYBUF: libc::c_ulong = 0xC0585609;
/// Enqueue buffer (v4l2_buffer: 88 bytes)
const VIDIOC_QBUF: libc::c_ulong = 0xC058560F;
/// Dequeue buffer (v4l2_buffer: 88 bytes)
const VIDIOC_DQBUF: libc::c_ulong = 0xC0585611;
/// Start streaming (int: 4 bytes)
const VIDIOC_STREAMON: libc::c_ulong = 0x40045612;
/// Stop streaming (int: 4 bytes)
const VIDIOC_STREAMOFF: libc::c_ulong = 0x40045613;
/// Get streaming parameters (v4l2_streamparm: 204 bytes)
const VIDIOC_G_PARM: libc::c_ulong = 0xC0CC5615;
/// Set streaming parameters (v4l2_streamparm: 204 bytes)
const VIDIOC_S_PARM: libc::c_ulong = 0xC0CC5616;
/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;
/// Enumerate frame sizes (v4l2_frmsizeenum: 44 bytes)
const VIDIOC_ENUM_FRAMESIZES: libc::c_ulong = 0xC02C564A;
/// Enumerate frame intervals (v4l2_frmivalenum: 52 bytes)
const VIDIOC_ENUM_FRAMEINTERVALS: libc::c_ulong = 0xC034564B;

// ===== V4L2 ioctl Structures =====

#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[repr(C)]
struct V4l2Fmtdesc {
    index: u32,
    buf_type: u32,
    flags: u32,
    description: [u8; 32],
    pixelformat: u32,
    reserved: [u32; 4],
}

#[repr(C)]
struct V4l2PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

/// The fmt union holds pointers in some variants, so it is 8-byte aligned
/// and the pix format occupies its leading bytes.
#[repr(C, align(8))]
struct V4l2FormatData([u8; 200]);

#[repr(C)]
struct V4l2Format {
    buf_type: u32,
    fmt: V4l2FormatData,
}

#[repr(C)]
struct V4l2Requestbuffers {
    count: u32,
    buf_type: u32,
    memory: u32,
    reserved: [u32; 2],
}

#[repr(C)]
struct V4l2Timecode {
    tc_type: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[repr(C)]
struct V4l2Buffer {
    index: u32,
    buf_type: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: V4l2Timecode,
    sequence: u32,
    memory: u32,
    /// Union of mmap offset / user pointer / planes; the mmap offset is the
    /// leading u32.
    m: [u32; 2],
    length: u32,
    reserved2: u32,
    reserved: u32,
}

#[repr(C)]
struct V4l2Frmsizeenum {
    index: u32,
    pixel_format: u32,
    size_type: u32,
    /// Union: discrete {width, height} or stepwise
    /// {min_w, max_w, step_w, min_h, max_h, step_h}
    sizes: [u32; 6],
    reserved: [u32; 2],
}

#[repr(C)]
struct V4l2Frmivalenum {
    index: u32,
    pixel_format: u32,
    width: u32,
    height: u32,
    ival_type: u32,
    /// Union of fractions: discrete {num, denom} or stepwise
    /// {min, max, step} as three {num, denom} pairs
    intervals: [u32; 6],
    reserved: [u32; 2],
}

#[repr(C)]
struct V4l2Fract {
    numerator: u32,
    denominator: u32,
}

#[repr(C)]
struct V4l2Captureparm {
    capability: u32,
    capturemode: u32,
    timeperframe: V4l2Fract,
    extendedmode: u32,
    readbuffers: u32,
    reserved: [u32; 4],
}

#[repr(C)]
struct V4l2Streamparm {
    buf_type: u32,
    capture: V4l2Captureparm,
    _raw: [u8; 160],
}

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

// ===== Helpers =====

/// Extract a null-terminated string from a fixed-size byte array
fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

/// Issue an ioctl, mapping failure to the errno it produced
fn ioctl<T>(fd: libc::c_int, request: libc::c_ulong, arg: *mut T) -> std::io::Result<()> {
    let result = unsafe { libc::ioctl(fd, request as _, arg) };
    if result < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// True when the errno signals the end of an indexed enumeration
fn is_enum_end(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL) | Some(libc::ENOTTY))
}

// ===== Device =====

/// An open V4L2 device node
///
/// The descriptor is opened non-blocking so a dequeue with no ready buffer
/// returns `EAGAIN` instead of stalling the capture loop.
pub struct V4l2Device {
    file: File,
}

impl V4l2Device {
    /// Open a device node such as `/dev/video0`
    pub fn open(path: &Path) -> CameraResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| CameraError::OpenFailed(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), fd = file.as_raw_fd(), "Opened V4L2 device");
        Ok(V4l2Device { file })
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }
}

impl CaptureDevice for V4l2Device {
    fn capabilities(&self) -> CameraResult<Capabilities> {
        let mut caps: V4l2Capability = unsafe { std::mem::zeroed() };
        ioctl(self.fd(), VIDIOC_QUERYCAP, &mut caps)
            .map_err(|e| CameraError::OpenFailed(format!("VIDIOC_QUERYCAP: {}", e)))?;
        Ok(Capabilities {
            driver: c_string(&caps.driver),
            card: c_string(&caps.card),
            bus_info: c_string(&caps.bus_info),
            capabilities: caps.capabilities,
            device_caps: caps.device_caps,
        })
    }

    fn enum_format(&self, index: u32) -> CameraResult<Option<FormatDesc>> {
        let mut desc: V4l2Fmtdesc = unsafe { std::mem::zeroed() };
        desc.index = index;
        desc.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        match ioctl(self.fd(), VIDIOC_ENUM_FMT, &mut desc) {
            Ok(()) => Ok(Some(FormatDesc {
                fourcc: FourCc(desc.pixelformat),
                description: c_string(&desc.description),
            })),
            Err(e) if is_enum_end(&e) => Ok(None),
            Err(e) => Err(CameraError::FatalDriver(format!("VIDIOC_ENUM_FMT: {}", e))),
        }
    }

    fn enum_frame_size(&self, fourcc: FourCc, index: u32) -> CameraResult<Option<FrameSize>> {
        let mut en: V4l2Frmsizeenum = unsafe { std::mem::zeroed() };
        en.index = index;
        en.pixel_format = fourcc.0;
        match ioctl(self.fd(), VIDIOC_ENUM_FRAMESIZES, &mut en) {
            Ok(()) => {
                let s = &en.sizes;
                let size = if en.size_type == V4L2_FRMSIZE_TYPE_DISCRETE {
                    FrameSize::discrete(s[0], s[1])
                } else {
                    // Continuous ranges arrive as stepwise with step 1
                    FrameSize::stepwise((s[0], s[1], s[2]), (s[3], s[4], s[5]))
                };
                Ok(Some(size))
            }
            Err(e) if is_enum_end(&e) => Ok(None),
            Err(e) => Err(CameraError::FatalDriver(format!(
                "VIDIOC_ENUM_FRAMESIZES: {}",
                e
            ))),
        }
    }

    fn enum_frame_interval(
        &self,
        fourcc: FourCc,
        width: u32,
        height: u32,
        index: u32,
    ) -> CameraResult<Option<FrameIntervalRange>> {
        let mut en: V4l2Frmivalenum = unsafe { std::mem::zeroed() };
        en.index = index;
        en.pixel_format = fourcc.0;
        en.width = width;
        en.height = height;
        match ioctl(self.fd(), VIDIOC_ENUM_FRAMEINTERVALS, &mut en) {
            Ok(()) => {
                let v = &en.intervals;
                let range = if en.ival_type == V4L2_FRMIVAL_TYPE_DISCRETE {
                    FrameIntervalRange {
                        min_num: v[0],
                        max_num: v[0],
                        step_num: 0,
                        min_denom: v[1],
                        max_denom: v[1],
                        step_denom: 0,
                    }
                } else {
                    FrameIntervalRange {
                        min_num: v[0],
                        min_denom: v[1],
                        max_num: v[2],
                        max_denom: v[3],
                        step_num: v[4],
                        step_denom: v[5],
                    }
                };
                Ok(Some(range))
            }
            Err(e) if is_enum_end(&e) => Ok(None),
            Err(e) => Err(CameraError::FatalDriver(format!(
                "VIDIOC_ENUM_FRAMEINTERVALS: {}",
                e
            ))),
        }
    }

    fn set_format(&self, fourcc: FourCc, width: u32, height: u32) -> CameraResult<FrameGeometry> {
        let mut format: V4l2Format = unsafe { std::mem::zeroed() };
        format.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        let pix = V4l2PixFormat {
            width,
            height,
            pixelformat: fourcc.0,
            field: V4L2_FIELD_ANY,
            bytesperline: 0,
            sizeimage: 0,
            colorspace: 0,
            priv_: 0,
            flags: 0,
            ycbcr_enc: 0,
            quantization: 0,
            xfer_func: 0,
        };
        unsafe {
            std::ptr::write_unaligned(format.fmt.0.as_mut_ptr() as *mut V4l2PixFormat, pix);
        }

        ioctl(self.fd(), VIDIOC_S_FMT, &mut format)
            .map_err(|e| CameraError::FormatNegotiation(format!("VIDIOC_S_FMT: {}", e)))?;

        // Read back what the driver granted; it is free to adjust
        // format, size, and stride.
        let granted: V4l2PixFormat =
            unsafe { std::ptr::read_unaligned(format.fmt.0.as_ptr() as *const V4l2PixFormat) };
        Ok(FrameGeometry {
            fourcc: FourCc(granted.pixelformat),
            width: granted.width,
            height: granted.height,
            stride: granted.bytesperline,
            size_image: granted.sizeimage,
        })
    }

    fn request_buffers(&self, count: u32) -> CameraResult<u32> {
        let mut req: V4l2Requestbuffers = unsafe { std::mem::zeroed() };
        req.count = count;
        req.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        req.memory = V4L2_MEMORY_MMAP;
        ioctl(self.fd(), VIDIOC_REQBUFS, &mut req)
            .map_err(|e| CameraError::BufferMap(format!("VIDIOC_REQBUFS: {}", e)))?;
        Ok(req.count)
    }

    fn map_buffer(&self, index: u32) -> CameraResult<MappedRegion> {
        let mut buf: V4l2Buffer = unsafe { std::mem::zeroed() };
        buf.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf.index = index;
        ioctl(self.fd(), VIDIOC_QUERYBUF, &mut buf)
            .map_err(|e| CameraError::BufferMap(format!("VIDIOC_QUERYBUF[{}]: {}", index, e)))?;

        let offset = buf.m[0];
        let length = buf.length as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CameraError::BufferMap(format!(
                "mmap buffer {}: {}",
                index,
                std::io::Error::last_os_error()
            )));
        }
        debug!(index, length, "Mapped capture buffer");
        Ok(unsafe { MappedRegion::from_mmap(ptr as *mut u8, length) })
    }

    fn queue_buffer(&self, index: u32) -> CameraResult<()> {
        let mut buf: V4l2Buffer = unsafe { std::mem::zeroed() };
        buf.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf.index = index;
        ioctl(self.fd(), VIDIOC_QBUF, &mut buf)
            .map_err(|e| CameraError::FatalDriver(format!("VIDIOC_QBUF[{}]: {}", index, e)))
    }

    fn dequeue_buffer(&self) -> CameraResult<Option<(u32, u32)>> {
        let mut buf: V4l2Buffer = unsafe { std::mem::zeroed() };
        buf.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        match ioctl(self.fd(), VIDIOC_DQBUF, &mut buf) {
            Ok(()) => Ok(Some((buf.index, buf.bytesused))),
            Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => Ok(None),
            Err(e) => Err(CameraError::FatalDriver(format!("VIDIOC_DQBUF: {}", e))),
        }
    }

    fn stream_on(&self) -> CameraResult<()> {
        let mut buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        ioctl(self.fd(), VIDIOC_STREAMON, &mut buf_type)
            .map_err(|e| CameraError::FatalDriver(format!("VIDIOC_STREAMON: {}", e)))
    }

    fn stream_off(&self) -> CameraResult<()> {
        let mut buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        ioctl(self.fd(), VIDIOC_STREAMOFF, &mut buf_type)
            .map_err(|e| CameraError::FatalDriver(format!("VIDIOC_STREAMOFF: {}", e)))
    }

    fn next_control(&self, id: u32) -> CameraResult<Option<ControlInfo>> {
        let mut id = id;
        loop {
            let mut query: V4l2Queryctrl = unsafe { std::mem::zeroed() };
            query.id = id | V4L2_CTRL_FLAG_NEXT_CTRL;
            match ioctl(self.fd(), VIDIOC_QUERYCTRL, &mut query) {
                Ok(()) => {
                    id = query.id;
                    if query.flags & V4L2_CTRL_FLAG_DISABLED != 0 {
                        continue;
                    }
                    let kind = match query.ctrl_type {
                        V4L2_CTRL_TYPE_INTEGER | V4L2_CTRL_TYPE_INTEGER64 => {
                            ControlKind::Integer
                        }
                        V4L2_CTRL_TYPE_BOOLEAN => ControlKind::Boolean,
                        V4L2_CTRL_TYPE_MENU => ControlKind::Menu,
                        // Buttons, classes, compound types: skip
                        _ => continue,
                    };
                    return Ok(Some(ControlInfo {
                        id: query.id,
                        name: c_string(&query.name),
                        kind,
                        minimum: query.minimum,
                        maximum: query.maximum,
                        step: query.step,
                        default_value: query.default_value,
                    }));
                }
                Err(e) if is_enum_end(&e) => return Ok(None),
                Err(e) => {
                    return Err(CameraError::FatalDriver(format!("VIDIOC_QUERYCTRL: {}", e)));
                }
            }
        }
    }

    fn get_control(&self, id: u32) -> CameraResult<i32> {
        let mut ctrl = V4l2Control { id, value: 0 };
        ioctl(self.fd(), VIDIOC_G_CTRL, &mut ctrl).map_err(|e| CameraError::Control {
            id,
            source: e.to_string(),
        })?;
        Ok(ctrl.value)
    }

    fn set_control(&self, id: u32, value: i32) -> CameraResult<()> {
        let mut ctrl = V4l2Control { id, value };
        ioctl(self.fd(), VIDIOC_S_CTRL, &mut ctrl).map_err(|e| CameraError::Control {
            id,
            source: e.to_string(),
        })?;
        if ctrl.value != value {
            debug!(
                id = format_args!("0x{:08x}", id),
                requested = value,
                actual = ctrl.value,
                "Control value was clamped by the driver"
            );
        }
        Ok(())
    }

    fn frame_rate(&self) -> CameraResult<FrameRate> {
        let mut parm: V4l2Streamparm = unsafe { std::mem::zeroed() };
        parm.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        ioctl(self.fd(), VIDIOC_G_PARM, &mut parm)
            .map_err(|e| CameraError::FatalDriver(format!("VIDIOC_G_PARM: {}", e)))?;
        let tf = &parm.capture.timeperframe;
        if tf.numerator == 0 || tf.denominator == 0 {
            return Err(CameraError::FatalDriver(format!(
                "Invalid frame rate ({}/{})",
                tf.numerator, tf.denominator
            )));
        }
        Ok(FrameRate::new(tf.numerator, tf.denominator))
    }

    fn set_frame_rate(&self, rate: FrameRate) -> CameraResult<()> {
        let mut parm: V4l2Streamparm = unsafe { std::mem::zeroed() };
        parm.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        parm.capture.timeperframe = V4l2Fract {
            numerator: rate.num,
            denominator: rate.denom,
        };
        ioctl(self.fd(), VIDIOC_S_PARM, &mut parm)
            .map_err(|e| CameraError::FatalDriver(format!("VIDIOC_S_PARM: {}", e)))
    }

    fn wait_readable(&self, timeout: Duration) -> CameraResult<ReadyState> {
        loop {
            let mut fds: libc::fd_set = unsafe { std::mem::zeroed() };
            unsafe {
                libc::FD_ZERO(&mut fds);
                libc::FD_SET(self.fd(), &mut fds);
            }
            let mut tv = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: timeout.subsec_micros() as libc::suseconds_t,
            };
            let count = unsafe {
                libc::select(
                    self.fd() + 1,
                    &mut fds,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &mut tv,
                )
            };
            if count > 0 {
                return Ok(ReadyState::Ready);
            }
            if count == 0 {
                return Ok(ReadyState::TimedOut);
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(CameraError::FatalDriver(format!("select: {}", err)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_match_ioctl_numbers() {
        // The size field encoded in each ioctl number must match the Rust
        // struct layout, or every call would fail with ENOTTY.
        assert_eq!(std::mem::size_of::<V4l2Capability>(), 104);
        assert_eq!(std::mem::size_of::<V4l2Fmtdesc>(), 64);
        assert_eq!(std::mem::size_of::<V4l2Format>(), 208);
        assert_eq!(std::mem::size_of::<V4l2Requestbuffers>(), 20);
        assert_eq!(std::mem::size_of::<V4l2Buffer>(), 88);
        assert_eq!(std::mem::size_of::<V4l2Streamparm>(), 204);
        assert_eq!(std::mem::size_of::<V4l2Control>(), 8);
        assert_eq!(std::mem::size_of::<V4l2Queryctrl>(), 68);
        assert_eq!(std::mem::size_of::<V4l2Frmsizeenum>(), 44);
        assert_eq!(std::mem::size_of::<V4l2Frmivalenum>(), 52);
    }

    #[test]
    fn test_ioctl_number_encoding() {
        // Spot-check the hand-computed numbers against the _IOC formula.
        let iorw = |nr: u32, size: u32| -> libc::c_ulong {
            ((3u64 << 30) | ((size as u64) << 16) | (0x56 << 8) | nr as u64) as libc::c_ulong
        };
        assert_eq!(VIDIOC_S_FMT, iorw(5, 208));
        assert_eq!(VIDIOC_REQBUFS, iorw(8, 20));
        assert_eq!(VIDIOC_DQBUF, iorw(17, 88));
        assert_eq!(VIDIOC_QUERYCTRL, iorw(36, 68));
    }

    #[test]
    fn test_c_string_extraction() {
        assert_eq!(c_string(b"uvcvideo\0\0\0\0"), "uvcvideo");
        assert_eq!(c_string(b"full"), "full");
    }
}
