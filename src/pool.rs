// SPDX-License-Identifier: GPL-3.0-only

//! Kernel buffer pool management
//!
//! The pool owns a fixed ring of memory-mapped buffer slots negotiated with
//! the driver. Each slot is owned by exactly one side at a time: the kernel
//! (queued, the driver may write) or the user (dequeued, a consumer may
//! read). The ownership bit is the one piece of state mutated from two
//! threads (capture loop dequeue vs. consumer release), so it lives behind
//! a mutex.

use crate::errors::{CameraError, CameraResult};
use crate::v4l2::{CaptureDevice, MappedRegion};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Which side may currently access a buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    /// Queued with the driver; the device writes into it
    Kernel,
    /// Dequeued; a consumer may read it until it is re-enqueued
    User,
}

/// A fixed ring of mapped kernel buffers
///
/// The granted buffer count is decided by the driver and fixed for the
/// pool's lifetime. Mappings are shared (`Arc`) with any frame still
/// holding the slot's bytes; unmapping happens once the last reference
/// drops.
pub struct BufferPool {
    device: Arc<dyn CaptureDevice>,
    slots: Vec<Arc<MappedRegion>>,
    owners: Mutex<Vec<SlotOwner>>,
}

impl BufferPool {
    /// Reserve and map a buffer ring
    ///
    /// The driver may grant fewer buffers than requested; the granted count
    /// is authoritative. Fewer than two buffers cannot sustain streaming
    /// (one draining, one filling) and fails with `InsufficientBuffers`.
    pub fn allocate(device: Arc<dyn CaptureDevice>, requested: u32) -> CameraResult<Self> {
        let granted = device.request_buffers(requested)?;
        if granted < 2 {
            return Err(CameraError::InsufficientBuffers { requested, granted });
        }

        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            slots.push(Arc::new(device.map_buffer(index)?));
        }
        debug!(requested, granted, "Allocated buffer pool");

        // Freshly reserved buffers belong to the kernel until dequeued.
        let owners = vec![SlotOwner::Kernel; granted as usize];
        Ok(BufferPool {
            device,
            slots,
            owners: Mutex::new(owners),
        })
    }

    /// Number of slots in the ring
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The mapped region backing a slot
    pub fn slot(&self, index: u32) -> CameraResult<Arc<MappedRegion>> {
        let index = self.checked_index(index)?;
        Ok(Arc::clone(&self.slots[index]))
    }

    /// Current owner of a slot
    pub fn owner(&self, index: u32) -> CameraResult<SlotOwner> {
        let index = self.checked_index(index)?;
        Ok(self.owners.lock().unwrap()[index])
    }

    /// Validate a slot index; a driver handing back an index outside the
    /// granted ring is broken and must not panic the capture loop.
    fn checked_index(&self, index: u32) -> CameraResult<usize> {
        let i = index as usize;
        if i >= self.slots.len() {
            return Err(CameraError::FatalDriver(format!(
                "buffer index {} out of range for {}-slot pool",
                index,
                self.slots.len()
            )));
        }
        Ok(i)
    }

    /// Count of slots currently owned by each side: `(kernel, user)`
    pub fn owner_counts(&self) -> (usize, usize) {
        let owners = self.owners.lock().unwrap();
        let kernel = owners.iter().filter(|o| **o == SlotOwner::Kernel).count();
        (kernel, owners.len() - kernel)
    }

    /// Submit every slot to the kernel queue (streaming start)
    pub fn queue_all(&self) -> CameraResult<()> {
        for index in 0..self.slots.len() as u32 {
            self.enqueue(index)?;
        }
        Ok(())
    }

    /// Submit a slot back to the kernel queue (User -> Kernel)
    pub fn enqueue(&self, index: u32) -> CameraResult<()> {
        let i = self.checked_index(index)?;
        self.device.queue_buffer(index)?;
        self.owners.lock().unwrap()[i] = SlotOwner::Kernel;
        Ok(())
    }

    /// Take the next ready slot from the kernel (Kernel -> User)
    ///
    /// Returns the slot index and the number of bytes the driver wrote,
    /// which may be less than the slot's mapped capacity. `None` means no
    /// buffer was ready.
    pub fn dequeue(&self) -> CameraResult<Option<(u32, u32)>> {
        let Some((index, bytes_used)) = self.device.dequeue_buffer()? else {
            return Ok(None);
        };
        let i = self.checked_index(index)?;
        let mut owners = self.owners.lock().unwrap();
        if owners[i] == SlotOwner::User {
            // The driver handed out a slot we thought was ours; the
            // ownership protocol has been violated somewhere.
            warn!(index, "Dequeued a slot already marked User-owned");
        }
        owners[i] = SlotOwner::User;
        Ok(Some((index, bytes_used)))
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kernel, user) = self.owner_counts();
        write!(
            f,
            "BufferPool({} slots, {} kernel / {} user)",
            self.len(),
            kernel,
            user
        )
    }
}
