//! Interrupt-safe receive FIFO
//!
//! Single producer (the receive interrupt), single consumer (the datalink
//! task). Every access runs inside a `critical_section`, which is the only
//! synchronisation boundary between interrupt and main-loop context.
//!
//! Bytes and line errors share one queue so the consumer sees an error at
//! the exact point in the byte stream where it happened.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use super::{LineErrors, RxByte, RxEvent};

struct FifoState<const N: usize> {
    queue: Deque<RxEvent, N>,
    overflows: u32,
    /// Bytes were dropped and no marker has been queued for them yet
    gap: bool,
}

impl<const N: usize> FifoState<N> {
    fn enqueue(&mut self, event: RxEvent, timestamp: u32) -> bool {
        if self.gap {
            if !self.mark_gap(timestamp) {
                self.overflows = self.overflows.wrapping_add(1);
                return false;
            }
            self.gap = false;
        }
        if self.queue.push_back(event).is_err() {
            self.overflows = self.overflows.wrapping_add(1);
            self.gap = true;
            return false;
        }
        true
    }

    /// Queue an overflow marker unless the newest entry already is one
    fn mark_gap(&mut self, timestamp: u32) -> bool {
        let marked = matches!(
            self.queue.back(),
            Some(RxEvent::Error { errors, .. }) if errors.contains(LineErrors::FIFO_OVERFLOW)
        );
        marked
            || self
                .queue
                .push_back(RxEvent::Error {
                    errors: LineErrors::FIFO_OVERFLOW,
                    timestamp,
                })
                .is_ok()
    }
}

/// Bounded queue of timestamped receive events
///
/// When full, the newest byte is dropped and counted; the events already
/// queued keep their order. Once space frees up, a
/// [`LineErrors::FIFO_OVERFLOW`] marker is queued ahead of the next byte so
/// the consumer knows the stream has a hole.
pub struct RxFifo<const N: usize> {
    state: Mutex<RefCell<FifoState<N>>>,
}

impl<const N: usize> RxFifo<N> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(FifoState {
                queue: Deque::new(),
                overflows: 0,
                gap: false,
            })),
        }
    }

    /// Queue a byte; returns `false` if it was dropped for lack of space
    pub fn push(&self, byte: RxByte) -> bool {
        critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .enqueue(RxEvent::Byte(byte), byte.timestamp)
        })
    }

    /// Queue a line error after the bytes already received
    pub fn push_error(&self, errors: LineErrors, timestamp: u32) -> bool {
        critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .enqueue(RxEvent::Error { errors, timestamp }, timestamp)
        })
    }

    pub fn pop(&self) -> Option<RxEvent> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).queue.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.is_empty())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.len())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Discard every queued event
    pub fn clear(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.queue.clear();
            state.gap = false;
        });
    }

    /// Events dropped since creation or the last [`reset_overflows`](Self::reset_overflows)
    pub fn overflows(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).overflows)
    }

    pub fn reset_overflows(&self) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).overflows = 0);
    }
}

impl<const N: usize> Default for RxFifo<N> {
    fn default() -> Self {
        Self::new()
    }
}
