// SPDX-License-Identifier: GPL-3.0-only

//! Single-slot rendezvous between the capture loop and consumers
//!
//! The cell carries at most one value at a time and never queues: a
//! non-blocking `try_send` succeeds only while a receiver is parked and the
//! previously delivered value has been released. This is what enforces the
//! engine's latency contract — a producer can never build up backlog ahead
//! of a slow consumer, and a second receiver cannot be satisfied out of
//! order before the first delivery is released.

use std::sync::{Arc, Condvar, Mutex};

/// Outcome of a non-blocking send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A parked receiver will take the value
    Delivered,
    /// No receiver was ready; the caller keeps the value
    NoReceiver,
    /// The cell is closed; no further deliveries will happen
    Closed,
}

struct State<T> {
    slot: Option<T>,
    /// Receivers currently parked in `recv`
    parked: usize,
    /// A delivered value has not been released yet
    in_flight: bool,
    closed: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// A zero-capacity handoff cell
///
/// Clones share the same cell.
pub struct Handoff<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Handoff {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Handoff {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    slot: None,
                    parked: 0,
                    in_flight: false,
                    closed: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Offer a value without blocking
    ///
    /// Delivery requires a parked receiver, an empty slot, and no
    /// unreleased previous delivery; otherwise the value is handed back
    /// via `NoReceiver` and the caller applies its drop policy.
    pub fn try_send(&self, value: T) -> (SendOutcome, Option<T>) {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return (SendOutcome::Closed, Some(value));
        }
        if state.parked > 0 && state.slot.is_none() && !state.in_flight {
            state.slot = Some(value);
            self.inner.cond.notify_all();
            (SendOutcome::Delivered, None)
        } else {
            (SendOutcome::NoReceiver, Some(value))
        }
    }

    /// Park until a value is delivered or the cell closes
    ///
    /// Returns `None` once the cell is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.inner.state.lock().unwrap();
        state.parked += 1;
        loop {
            if let Some(value) = state.slot.take() {
                state.parked -= 1;
                state.in_flight = true;
                return Some(value);
            }
            if state.closed {
                state.parked -= 1;
                return None;
            }
            state = self.inner.cond.wait(state).unwrap();
        }
    }

    /// Mark the in-flight delivery as released, re-arming delivery
    pub fn delivery_released(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.in_flight = false;
        self.inner.cond.notify_all();
    }

    /// Close the cell and wake every parked receiver
    ///
    /// A value already sitting in the slot is still taken by a parked
    /// receiver; subsequent `recv` calls return `None`.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.closed = true;
        self.inner.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_send_without_receiver_is_refused() {
        let cell: Handoff<u32> = Handoff::new();
        let (outcome, returned) = cell.try_send(7);
        assert_eq!(outcome, SendOutcome::NoReceiver);
        assert_eq!(returned, Some(7));
    }

    #[test]
    fn test_delivery_to_parked_receiver() {
        let cell: Handoff<u32> = Handoff::new();
        let receiver = cell.clone();
        let handle = thread::spawn(move || receiver.recv());

        // Wait for the receiver to park, then send.
        let mut delivered = false;
        for _ in 0..200 {
            if cell.try_send(42).0 == SendOutcome::Delivered {
                delivered = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(delivered);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn test_no_redelivery_before_release() {
        let cell: Handoff<u32> = Handoff::new();

        let receiver = cell.clone();
        let first = thread::spawn(move || receiver.recv());
        while cell.try_send(1).0 != SendOutcome::Delivered {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(first.join().unwrap(), Some(1));

        // First delivery not released; a parked second receiver must not
        // be satisfied.
        let receiver = cell.clone();
        let second = thread::spawn(move || receiver.recv());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cell.try_send(2).0, SendOutcome::NoReceiver);

        cell.delivery_released();
        while cell.try_send(3).0 != SendOutcome::Delivered {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(second.join().unwrap(), Some(3));
    }

    #[test]
    fn test_close_wakes_parked_receivers() {
        let cell: Handoff<u32> = Handoff::new();
        let receiver = cell.clone();
        let handle = thread::spawn(move || receiver.recv());
        thread::sleep(Duration::from_millis(10));

        cell.close();
        assert_eq!(handle.join().unwrap(), None);
        assert_eq!(cell.try_send(9).0, SendOutcome::Closed);
    }

    #[test]
    fn test_recv_after_close_returns_none() {
        let cell: Handoff<u32> = Handoff::new();
        cell.close();
        assert_eq!(cell.recv(), None);
    }
}
