//! Bounded, closeable, multi-producer/multi-consumer FIFO queue.
//!
//! A capacity of `0` gives an unbuffered queue: a send only completes when a
//! receiver takes the value directly. Any larger capacity buffers up to that
//! many values before senders block.
//!
//! Elements move by value. The queue never clones or deep-copies them, so if
//! `T` shares state (an `Arc<Mutex<_>>`, say) a mutation made after `send`
//! but before `recv` is visible to the receiver.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::{
    RecvTimeoutError, SendTimeoutError, TryRecvError, TrySendError, UsageError,
};
use crate::parker::{Parker, Slot};

// =============================================================================
// Shared state (one critical section per queue)
// =============================================================================

pub(crate) struct Waiter<T> {
    parker: Arc<Parker>,
    case: usize,
    slot: Arc<Slot<T>>,
}

impl<T> Waiter<T> {
    pub(crate) fn new(parker: &Arc<Parker>, case: usize, slot: &Arc<Slot<T>>) -> Self {
        Waiter {
            parker: Arc::clone(parker),
            case,
            slot: Arc::clone(slot),
        }
    }
}

/// Pops waiters until one can be claimed. Waiters whose parker was already
/// claimed elsewhere are dropped; their owner unregisters on wake-up anyway.
fn claim_next<T>(waiters: &mut VecDeque<Waiter<T>>) -> Option<Waiter<T>> {
    while let Some(waiter) = waiters.pop_front() {
        if waiter.parker.try_claim(waiter.case) {
            return Some(waiter);
        }
    }
    None
}

pub(crate) struct State<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    closed: bool,
    receivers: VecDeque<Waiter<T>>,
    senders: VecDeque<Waiter<T>>,
}

impl<T> State<T> {
    fn new(capacity: usize) -> Self {
        State {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            closed: false,
            receivers: VecDeque::new(),
            senders: VecDeque::new(),
        }
    }

    pub(crate) fn try_send(&mut self, value: T) -> Result<(), TrySendError<T>> {
        if self.closed {
            return Err(TrySendError::Closed(value));
        }
        // A parked receiver means the buffer is empty: hand off directly.
        if let Some(receiver) = claim_next(&mut self.receivers) {
            receiver.slot.put(value);
            receiver.parker.unpark();
            return Ok(());
        }
        if self.buffer.len() < self.capacity {
            self.buffer.push_back(value);
            Ok(())
        } else {
            Err(TrySendError::Full(value))
        }
    }

    pub(crate) fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if let Some(value) = self.buffer.pop_front() {
            // Room just opened up; move the oldest parked sender into the tail.
            if let Some(sender) = claim_next(&mut self.senders) {
                if let Some(pending) = sender.slot.take() {
                    self.buffer.push_back(pending);
                }
                sender.parker.unpark();
            }
            return Ok(value);
        }
        if let Some(sender) = claim_next(&mut self.senders) {
            let value = sender.slot.take();
            sender.parker.unpark();
            if let Some(value) = value {
                return Ok(value);
            }
        }
        if self.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    pub(crate) fn park_receiver(&mut self, waiter: Waiter<T>) {
        self.receivers.push_back(waiter);
    }

    pub(crate) fn park_sender(&mut self, waiter: Waiter<T>) {
        self.senders.push_back(waiter);
    }

    pub(crate) fn unregister(&mut self, parker: &Arc<Parker>) {
        self.receivers.retain(|w| !Arc::ptr_eq(&w.parker, parker));
        self.senders.retain(|w| !Arc::ptr_eq(&w.parker, parker));
    }

    fn close(&mut self) -> Result<usize, UsageError> {
        if self.closed {
            return Err(UsageError::CloseOfClosed);
        }
        self.closed = true;

        // Receivers find their slot empty (closed); senders find their value
        // still in place and report the usage error themselves.
        let mut woken = 0;
        for waiter in self.receivers.drain(..).chain(self.senders.drain(..)) {
            if waiter.parker.try_claim(waiter.case) {
                waiter.parker.unpark();
                woken += 1;
            }
        }
        Ok(woken)
    }
}

pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

// =============================================================================
// Public handle
// =============================================================================

struct Inner<T> {
    capacity: usize,
    state: Mutex<State<T>>,
}

/// A handle to a bounded FIFO queue shared by any number of senders and
/// receivers.
///
/// Cloning the handle is cheap and every clone refers to the same queue.
/// Dropping handles never closes the queue; only [`close`] does.
///
/// [`close`]: RendezvousQueue::close
pub struct RendezvousQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> RendezvousQueue<T> {
    pub fn new(capacity: usize) -> Self {
        RendezvousQueue {
            inner: Arc::new(Inner {
                capacity,
                state: Mutex::new(State::new(capacity)),
            }),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(capacity)
    }

    /// A zero-capacity queue: every send is a direct handoff.
    pub fn unbuffered() -> Self {
        Self::new(0)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity used to order lock acquisition across queues.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Blocks until the value is buffered or handed to a receiver.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::SendOnClosed`] if the queue is closed, or
    /// becomes closed while this call is blocked.
    pub fn send(&self, value: T) {
        if self.send_until(value, None).is_err() {
            panic!("{}", UsageError::SendOnClosed);
        }
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.lock_state().try_send(value)
    }

    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.send_until(value, deadline_after(timeout))
    }

    fn send_until(&self, value: T, deadline: Option<Instant>) -> Result<(), SendTimeoutError<T>> {
        let mut state = self.lock_state();
        let value = match state.try_send(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(value)) => return Err(SendTimeoutError::Closed(value)),
            Err(TrySendError::Full(value)) => value,
        };

        let parker = Parker::new();
        let slot = Slot::new(Some(value));
        state.park_sender(Waiter::new(&parker, 0, &slot));
        drop(state);
        trace!("sender parked on queue {:#x}", self.addr());

        match parker.park(deadline) {
            // Claimed: an empty slot means a receiver took the value, a full
            // one means the queue was closed under us.
            Some(_) => match slot.take() {
                None => Ok(()),
                Some(value) => Err(SendTimeoutError::Closed(value)),
            },
            None => {
                self.lock_state().unregister(&parker);
                match slot.take() {
                    Some(value) => Err(SendTimeoutError::Timeout(value)),
                    None => Ok(()),
                }
            }
        }
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Blocks until a value arrives. Returns `None` once the queue is closed
    /// and every buffered value has been received.
    pub fn recv(&self) -> Option<T> {
        self.recv_until(None).ok()
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.lock_state().try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.recv_until(deadline_after(timeout))
    }

    fn recv_until(&self, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
        let mut state = self.lock_state();
        match state.try_recv() {
            Ok(value) => return Ok(value),
            Err(TryRecvError::Closed) => return Err(RecvTimeoutError::Closed),
            Err(TryRecvError::Empty) => {}
        }

        let parker = Parker::new();
        let slot = Slot::new(None);
        state.park_receiver(Waiter::new(&parker, 0, &slot));
        drop(state);
        trace!("receiver parked on queue {:#x}", self.addr());

        match parker.park(deadline) {
            Some(_) => slot.take().ok_or(RecvTimeoutError::Closed),
            None => {
                self.lock_state().unregister(&parker);
                slot.take().ok_or(RecvTimeoutError::Timeout)
            }
        }
    }

    // =========================================================================
    // Closing
    // =========================================================================

    /// Marks the queue closed and wakes every blocked task.
    ///
    /// Buffered values stay available to receivers. Blocked senders panic.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::CloseOfClosed`] if the queue is already
    /// closed. Use [`try_close`](Self::try_close) when several tasks may race
    /// to close.
    pub fn close(&self) {
        if let Err(err) = self.try_close() {
            panic!("{}", err);
        }
    }

    pub fn try_close(&self) -> Result<(), UsageError> {
        let woken = self.lock_state().close()?;
        debug!("queue {:#x} closed, woke {} waiter(s)", self.addr(), woken);
        Ok(())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Blocking iterator over received values, the "range over channel"
    /// pattern. It ends when the queue is closed and drained.
    ///
    /// Iterating a queue that nobody ever closes blocks forever once the
    /// backlog is gone.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { queue: self }
    }

    /// Yields whatever is ready right now without blocking.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { queue: self }
    }
}

impl<T> Clone for RendezvousQueue<T> {
    fn clone(&self) -> Self {
        RendezvousQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RendezvousQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("RendezvousQueue")
            .field("len", &state.buffer.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

pub struct Iter<'a, T> {
    queue: &'a RendezvousQueue<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.recv()
    }
}

pub struct TryIter<'a, T> {
    queue: &'a RendezvousQueue<T>,
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.try_recv().ok()
    }
}

pub struct IntoIter<T> {
    queue: RendezvousQueue<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.recv()
    }
}

impl<'a, T> IntoIterator for &'a RendezvousQueue<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for RendezvousQueue<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { queue: self }
    }
}
