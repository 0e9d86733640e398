// SPDX-License-Identifier: GPL-3.0-only

//! Scripted in-memory capture device for unit tests
//!
//! Buffers are heap-backed regions filled from a configurable pattern.
//! Queued buffers become ready immediately; `wait_readable` sleeps a
//! millisecond per call so capture-loop tests cannot spin unboundedly.

use super::{
    Capabilities, CaptureDevice, ControlInfo, ControlKind, MappedRegion, ReadyState,
    V4L2_CAP_STREAMING, V4L2_CAP_VIDEO_CAPTURE,
};
use crate::errors::{CameraError, CameraResult};
use crate::format::{
    FormatDesc, FourCc, FrameGeometry, FrameIntervalRange, FrameRate, FrameSize,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) struct FakeDevice {
    state: Mutex<FakeState>,
}

struct FakeState {
    caps: Capabilities,
    formats: Vec<FormatDesc>,
    sizes: Vec<FrameSize>,
    intervals: Vec<FrameIntervalRange>,
    bytes_per_pixel: u32,
    grant_buffers: Option<u32>,
    grant_geometry: Option<FrameGeometry>,
    geometry: Option<FrameGeometry>,
    frame_pattern: Vec<u8>,
    bytes_used: Option<u32>,
    queued: VecDeque<u32>,
    queue_log: Vec<u32>,
    streaming: bool,
    wait_script: VecDeque<CameraResult<ReadyState>>,
    starved: bool,
    controls: BTreeMap<u32, i32>,
    frame_rate: FrameRate,
    grant_frame_rate: Option<FrameRate>,
}

impl FakeDevice {
    pub(crate) fn new() -> Self {
        FakeDevice {
            state: Mutex::new(FakeState {
                caps: Capabilities {
                    driver: "fake".to_string(),
                    card: "Fake Capture Device".to_string(),
                    bus_info: "platform:fake".to_string(),
                    capabilities: V4L2_CAP_VIDEO_CAPTURE | V4L2_CAP_STREAMING,
                    device_caps: 0,
                },
                formats: vec![FormatDesc {
                    fourcc: FourCc::YUYV,
                    description: "YUYV 4:2:2".to_string(),
                }],
                sizes: vec![
                    FrameSize::discrete(640, 480),
                    FrameSize::stepwise((160, 320, 160), (120, 240, 120)),
                ],
                intervals: vec![FrameIntervalRange {
                    min_num: 1,
                    max_num: 1,
                    step_num: 0,
                    min_denom: 30,
                    max_denom: 30,
                    step_denom: 0,
                }],
                bytes_per_pixel: 2,
                grant_buffers: None,
                grant_geometry: None,
                geometry: None,
                frame_pattern: vec![0x80],
                bytes_used: None,
                queued: VecDeque::new(),
                queue_log: Vec::new(),
                streaming: false,
                wait_script: VecDeque::new(),
                starved: false,
                controls: BTreeMap::from([(0x0098090c, 1)]),
                frame_rate: FrameRate::new(1, 30),
                grant_frame_rate: None,
            }),
        }
    }

    pub(crate) fn set_capabilities(&self, flags: u32) {
        self.state.lock().unwrap().caps.capabilities = flags;
    }

    pub(crate) fn set_formats(&self, formats: Vec<FormatDesc>) {
        self.state.lock().unwrap().formats = formats;
    }

    pub(crate) fn set_sizes(&self, sizes: Vec<FrameSize>) {
        self.state.lock().unwrap().sizes = sizes;
    }

    /// Override the count granted by `request_buffers`
    pub(crate) fn set_grant_buffers(&self, count: u32) {
        self.state.lock().unwrap().grant_buffers = Some(count);
    }

    /// Force `set_format` to grant a specific geometry regardless of request
    pub(crate) fn set_grant_geometry(&self, geometry: FrameGeometry) {
        self.state.lock().unwrap().grant_geometry = Some(geometry);
    }

    /// Pattern repeated to fill every mapped buffer
    pub(crate) fn set_frame_pattern(&self, pattern: Vec<u8>) {
        self.state.lock().unwrap().frame_pattern = pattern;
    }

    /// Override `bytes_used` reported by dequeue (defaults to the granted
    /// image size)
    pub(crate) fn set_bytes_used(&self, bytes: u32) {
        self.state.lock().unwrap().bytes_used = Some(bytes);
    }

    /// Force `set_frame_rate` to grant a specific rate regardless of request
    pub(crate) fn set_grant_frame_rate(&self, rate: FrameRate) {
        self.state.lock().unwrap().grant_frame_rate = Some(rate);
    }

    /// A starved device never signals readiness, as if the sensor stopped
    /// producing frames
    pub(crate) fn set_starved(&self, starved: bool) {
        self.state.lock().unwrap().starved = starved;
    }

    /// Queue a scripted outcome for the next `wait_readable` call
    pub(crate) fn push_wait_result(&self, result: CameraResult<ReadyState>) {
        self.state.lock().unwrap().wait_script.push_back(result);
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.state.lock().unwrap().queued.len()
    }

    /// Every index ever passed to `queue_buffer`, in order
    pub(crate) fn queue_log(&self) -> Vec<u32> {
        self.state.lock().unwrap().queue_log.clone()
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state.lock().unwrap().streaming
    }

    fn buffer_len(state: &FakeState) -> usize {
        state
            .geometry
            .map(|g| g.size_image as usize)
            .unwrap_or(640 * 480 * 2)
    }
}

impl CaptureDevice for FakeDevice {
    fn capabilities(&self) -> CameraResult<Capabilities> {
        Ok(self.state.lock().unwrap().caps.clone())
    }

    fn enum_format(&self, index: u32) -> CameraResult<Option<FormatDesc>> {
        Ok(self.state.lock().unwrap().formats.get(index as usize).cloned())
    }

    fn enum_frame_size(&self, _fourcc: FourCc, index: u32) -> CameraResult<Option<FrameSize>> {
        Ok(self.state.lock().unwrap().sizes.get(index as usize).copied())
    }

    fn enum_frame_interval(
        &self,
        _fourcc: FourCc,
        _width: u32,
        _height: u32,
        index: u32,
    ) -> CameraResult<Option<FrameIntervalRange>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .intervals
            .get(index as usize)
            .copied())
    }

    fn set_format(&self, fourcc: FourCc, width: u32, height: u32) -> CameraResult<FrameGeometry> {
        let mut state = self.state.lock().unwrap();
        let granted = state.grant_geometry.unwrap_or_else(|| {
            let stride = width * state.bytes_per_pixel;
            FrameGeometry {
                fourcc,
                width,
                height,
                stride,
                size_image: stride * height,
            }
        });
        state.geometry = Some(granted);
        Ok(granted)
    }

    fn request_buffers(&self, count: u32) -> CameraResult<u32> {
        let state = self.state.lock().unwrap();
        Ok(state.grant_buffers.unwrap_or(count))
    }

    fn map_buffer(&self, _index: u32) -> CameraResult<MappedRegion> {
        let state = self.state.lock().unwrap();
        let len = Self::buffer_len(&state);
        let mut data = Vec::with_capacity(len);
        if state.frame_pattern.is_empty() {
            data.resize(len, 0);
        }
        while data.len() < len {
            let take = (len - data.len()).min(state.frame_pattern.len());
            data.extend_from_slice(&state.frame_pattern[..take]);
        }
        Ok(MappedRegion::from_vec(data))
    }

    fn queue_buffer(&self, index: u32) -> CameraResult<()> {
        let mut state = self.state.lock().unwrap();
        state.queued.push_back(index);
        state.queue_log.push(index);
        Ok(())
    }

    fn dequeue_buffer(&self) -> CameraResult<Option<(u32, u32)>> {
        let mut state = self.state.lock().unwrap();
        let bytes_used = state
            .bytes_used
            .unwrap_or_else(|| Self::buffer_len(&state) as u32);
        Ok(state.queued.pop_front().map(|index| (index, bytes_used)))
    }

    fn stream_on(&self) -> CameraResult<()> {
        self.state.lock().unwrap().streaming = true;
        Ok(())
    }

    fn stream_off(&self) -> CameraResult<()> {
        self.state.lock().unwrap().streaming = false;
        Ok(())
    }

    fn next_control(&self, id: u32) -> CameraResult<Option<ControlInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .controls
            .range((id + 1)..)
            .next()
            .map(|(&id, &default_value)| ControlInfo {
                id,
                name: format!("Control 0x{:08x}", id),
                kind: ControlKind::Integer,
                minimum: 0,
                maximum: 255,
                step: 1,
                default_value,
            }))
    }

    fn get_control(&self, id: u32) -> CameraResult<i32> {
        self.state
            .lock()
            .unwrap()
            .controls
            .get(&id)
            .copied()
            .ok_or(CameraError::Control {
                id,
                source: "Invalid argument".to_string(),
            })
    }

    fn set_control(&self, id: u32, value: i32) -> CameraResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.controls.contains_key(&id) {
            return Err(CameraError::Control {
                id,
                source: "Invalid argument".to_string(),
            });
        }
        state.controls.insert(id, value);
        Ok(())
    }

    fn frame_rate(&self) -> CameraResult<FrameRate> {
        Ok(self.state.lock().unwrap().frame_rate)
    }

    fn set_frame_rate(&self, rate: FrameRate) -> CameraResult<()> {
        let mut state = self.state.lock().unwrap();
        state.frame_rate = state.grant_frame_rate.unwrap_or(rate);
        Ok(())
    }

    fn wait_readable(&self, _timeout: Duration) -> CameraResult<ReadyState> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(result) = state.wait_script.pop_front() {
                return result;
            }
        }
        // Pace the capture loop like a real sensor would
        std::thread::sleep(Duration::from_millis(1));
        let state = self.state.lock().unwrap();
        if state.starved || state.queued.is_empty() {
            Ok(ReadyState::TimedOut)
        } else {
            Ok(ReadyState::Ready)
        }
    }
}
