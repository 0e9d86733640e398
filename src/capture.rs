// SPDX-License-Identifier: GPL-3.0-only

//! Capture session and the background capture loop
//!
//! A [`Session`] owns the streaming lifecycle: negotiate a format, start
//! the loop, fetch frames, stop. The loop dequeues filled buffers on its
//! own thread and offers each one to the handoff cell without blocking;
//! when no consumer is parked the buffer goes straight back to the kernel
//! queue. Consumers therefore always see the freshest frame and the driver
//! never starves for buffers behind a slow reader.

use crate::config::CaptureConfig;
use crate::decode::{DecodeFn, DecoderRegistry, Frame, FrameBytes, ReleaseFn};
use crate::device::Camera;
use crate::errors::{CameraError, CameraResult};
use crate::format::{FourCc, FrameGeometry};
use crate::handoff::{Handoff, SendOutcome};
use crate::pool::BufferPool;
use crate::v4l2::{CaptureDevice, ReadyState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// A filled buffer slot in transit from the loop to a consumer
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    index: u32,
    length: u32,
}

struct SessionState {
    streaming: bool,
    geometry: Option<FrameGeometry>,
    decode: Option<DecodeFn>,
    pool: Option<Arc<BufferPool>>,
    handoff: Option<Handoff<Snapshot>>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

/// A capture session over one camera
///
/// All methods take `&self`; the session may be shared across threads.
/// Lifecycle: [`Session::configure`], [`Session::start_streaming`], any
/// number of [`Session::get_frame`] calls, [`Session::stop_streaming`].
pub struct Session {
    camera: Camera,
    registry: DecoderRegistry,
    config: Mutex<CaptureConfig>,
    state: Mutex<SessionState>,
    /// First fatal loop error, surfaced on the next consumer call
    fault: Arc<Mutex<Option<CameraError>>>,
}

impl Session {
    pub fn new(camera: Camera, registry: DecoderRegistry, config: CaptureConfig) -> Self {
        Session {
            camera,
            registry,
            config: Mutex::new(config),
            state: Mutex::new(SessionState {
                streaming: false,
                geometry: None,
                decode: None,
                pool: None,
                handoff: None,
                worker: None,
                stop: Arc::new(AtomicBool::new(false)),
            }),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// The camera behind this session, for controls and enumeration
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Negotiate a format and bind the matching decoder
    ///
    /// The decoder is built for the geometry the driver *granted*, which
    /// may differ from the request.
    pub fn configure(
        &self,
        fourcc: FourCc,
        width: u32,
        height: u32,
    ) -> CameraResult<FrameGeometry> {
        let mut state = self.state.lock().unwrap();
        if state.streaming {
            return Err(CameraError::StreamTransition(
                "cannot reconfigure while streaming",
            ));
        }
        let granted = self.camera.negotiate(fourcc, width, height)?;
        let factory = self.registry.lookup(granted.fourcc)?;
        state.decode = Some(factory(&granted));
        state.geometry = Some(granted);
        Ok(granted)
    }

    /// The geometry granted by the last successful [`Session::configure`]
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.state.lock().unwrap().geometry
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().unwrap().streaming
    }

    /// Change the number of buffers requested at the next start
    pub fn set_buffer_count(&self, count: u32) -> CameraResult<()> {
        if self.state.lock().unwrap().streaming {
            return Err(CameraError::StreamTransition(
                "cannot change buffer count while streaming",
            ));
        }
        self.config.lock().unwrap().buffer_count = count;
        Ok(())
    }

    /// Change the loop's readiness timeout used at the next start
    pub fn set_timeout(&self, secs: u32) -> CameraResult<()> {
        if self.state.lock().unwrap().streaming {
            return Err(CameraError::StreamTransition(
                "cannot change timeout while streaming",
            ));
        }
        self.config.lock().unwrap().timeout_secs = secs;
        Ok(())
    }

    pub fn config(&self) -> CaptureConfig {
        self.config.lock().unwrap().clone()
    }

    /// Allocate buffers, start the stream and spawn the capture loop
    pub fn start_streaming(&self) -> CameraResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.streaming {
            return Err(CameraError::StreamTransition("already streaming"));
        }
        if state.decode.is_none() {
            return Err(CameraError::StreamTransition("session not configured"));
        }
        let config = self.config.lock().unwrap().clone();
        let device = self.camera.device();

        let pool = Arc::new(BufferPool::allocate(
            Arc::clone(&device),
            config.buffer_count,
        )?);
        pool.queue_all()?;
        device.stream_on()?;

        *self.fault.lock().unwrap() = None;
        let handoff: Handoff<Snapshot> = Handoff::new();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let pool = Arc::clone(&pool);
            let handoff = handoff.clone();
            let stop = Arc::clone(&stop);
            let fault = Arc::clone(&self.fault);
            let timeout = config.timeout();
            std::thread::Builder::new()
                .name("capture-loop".to_string())
                .spawn(move || capture_loop(device, pool, handoff, stop, fault, timeout))
                .map_err(|e| CameraError::FatalDriver(format!("spawn capture loop: {}", e)))?
        };

        info!(buffers = pool.len(), "Started streaming");
        state.pool = Some(pool);
        state.handoff = Some(handoff);
        state.worker = Some(worker);
        state.stop = stop;
        state.streaming = true;
        Ok(())
    }

    /// Block for the next captured frame, decoded and ready to read
    ///
    /// Suspends until the capture loop delivers a frame or the session
    /// shuts down; shutdown surfaces as `NoFrameAvailable`. A fatal
    /// capture loop error is surfaced here on the first call after it
    /// occurred.
    pub fn get_frame(&self) -> CameraResult<Frame> {
        let (handoff, pool, decode) = {
            let state = self.state.lock().unwrap();
            self.check_fault()?;
            match (&state.handoff, &state.pool, &state.decode) {
                (Some(handoff), Some(pool), Some(decode)) if state.streaming => {
                    (handoff.clone(), Arc::clone(pool), Arc::clone(decode))
                }
                _ => return Err(CameraError::NoFrameAvailable),
            }
        };

        // The loop closes the cell on every exit path, so this wait can
        // only outlive the session by the time it takes to observe close.
        let Some(snapshot) = handoff.recv() else {
            self.check_fault()?;
            return Err(CameraError::NoFrameAvailable);
        };

        let region = match pool.slot(snapshot.index) {
            Ok(region) => region,
            Err(e) => {
                handoff.delivery_released();
                return Err(e);
            }
        };
        let bytes = FrameBytes::new(region, snapshot.length as usize);
        let release: ReleaseFn = {
            let index = snapshot.index;
            let handoff = handoff.clone();
            Box::new(move || {
                if let Err(e) = pool.enqueue(index) {
                    warn!(index, error = %e, "Failed to re-enqueue released buffer");
                }
                handoff.delivery_released();
            })
        };
        decode(bytes, release)
    }

    /// Alias for [`Session::get_frame`]
    pub fn snap(&self) -> CameraResult<Frame> {
        self.get_frame()
    }

    /// Stop the capture loop and release the buffer ring
    pub fn stop_streaming(&self) -> CameraResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.streaming {
            return Err(CameraError::StreamTransition("not streaming"));
        }

        state.stop.store(true, Ordering::Relaxed);
        if let Some(handoff) = &state.handoff {
            handoff.close();
        }
        if let Some(worker) = state.worker.take() {
            // The loop exits within one wait timeout.
            if worker.join().is_err() {
                warn!("Capture loop thread panicked");
            }
        }
        state.streaming = false;
        state.handoff = None;
        state.pool = None;

        self.camera.device().stream_off()?;
        info!("Stopped streaming");
        Ok(())
    }

    /// Shut the session down; safe to call in any state and repeatedly
    pub fn close(&self) {
        if self.is_streaming() {
            if let Err(e) = self.stop_streaming() {
                warn!(error = %e, "Error while stopping stream on close");
            }
        }
    }

    /// The fatal capture loop error, if one has occurred
    pub fn fault(&self) -> Option<CameraError> {
        self.fault.lock().unwrap().clone()
    }

    fn check_fault(&self) -> CameraResult<()> {
        match &*self.fault.lock().unwrap() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session({:?}, streaming: {})",
            self.camera,
            self.is_streaming()
        )
    }
}

/// Body of the background capture thread
///
/// Runs until the stop flag is set, the handoff closes, or a fatal driver
/// error occurs. Timeouts are a normal pacing condition and also serve as
/// the stop-flag poll point. The cell is closed on every exit path so a
/// parked consumer can never hang on a dead loop.
fn capture_loop(
    device: Arc<dyn CaptureDevice>,
    pool: Arc<BufferPool>,
    handoff: Handoff<Snapshot>,
    stop: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<CameraError>>>,
    timeout: Duration,
) {
    let mut dropped: u64 = 0;
    while !stop.load(Ordering::Relaxed) {
        match device.wait_readable(timeout) {
            Ok(ReadyState::TimedOut) => continue,
            Ok(ReadyState::Ready) => {}
            Err(e) => {
                warn!(error = %e, "Capture loop terminating on wait error");
                *fault.lock().unwrap() = Some(e);
                break;
            }
        }

        let (index, length) = match pool.dequeue() {
            Ok(Some(ready)) => ready,
            // Readiness can race a concurrent stop; just wait again.
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Capture loop terminating on dequeue error");
                *fault.lock().unwrap() = Some(e);
                break;
            }
        };

        match handoff.try_send(Snapshot { index, length }) {
            (SendOutcome::Delivered, _) => {
                trace!(index, length, "Delivered frame to consumer");
            }
            (SendOutcome::NoReceiver, _) => {
                dropped += 1;
                trace!(index, dropped, "No consumer parked; recycling buffer");
                if let Err(e) = pool.enqueue(index) {
                    warn!(index, error = %e, "Capture loop terminating on re-enqueue error");
                    *fault.lock().unwrap() = Some(e);
                    break;
                }
            }
            (SendOutcome::Closed, _) => {
                // Shutdown raced the dequeue; hand the slot back and leave.
                if let Err(e) = pool.enqueue(index) {
                    debug!(index, error = %e, "Re-enqueue failed during shutdown");
                }
                break;
            }
        }
    }
    handoff.close();
    debug!(dropped, "Capture loop exited");
}
