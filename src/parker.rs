//! One-shot wake-up cell for a task blocked on one or more queues.
//!
//! A blocked `send`, `recv` or `Select::wait` creates a single [`Parker`] and
//! registers it (together with a case index and a [`Slot`]) with every queue
//! it waits on. The first party to [`claim`](Parker::try_claim) the parker
//! decides which case resolved: a counterpart operation, `close`, or the
//! parked task's own deadline. Everyone else sees the claim fail and skips the
//! registration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

const WAITING: usize = usize::MAX;
const ABORTED: usize = usize::MAX - 1;

pub(crate) struct Parker {
    selected: AtomicUsize,
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Parker {
            selected: AtomicUsize::new(WAITING),
            woken: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    /// Claims the parker for `case`. Must be called with the lock of the
    /// queue the registration lives in held, and followed by [`unpark`] once
    /// the slot holds its final contents.
    ///
    /// [`unpark`]: Parker::unpark
    pub(crate) fn try_claim(&self, case: usize) -> bool {
        self.selected
            .compare_exchange(WAITING, case, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unpark(&self) {
        let mut woken = self.lock_woken();
        *woken = true;
        self.condvar.notify_one();
    }

    /// Blocks until claimed and unparked. Returns the winning case, or `None`
    /// if the deadline passed first.
    pub(crate) fn park(&self, deadline: Option<Instant>) -> Option<usize> {
        let mut woken = self.lock_woken();
        loop {
            if *woken {
                return Some(self.selected.load(Ordering::Acquire));
            }
            match deadline {
                None => {
                    woken = self
                        .condvar
                        .wait(woken)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        if self
                            .selected
                            .compare_exchange(WAITING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            return None;
                        }
                        // Claimed just now; the claimer finishes the handoff
                        // under its queue lock and unparks shortly.
                        woken = self
                            .condvar
                            .wait_while(woken, |woken| !*woken)
                            .unwrap_or_else(PoisonError::into_inner);
                        continue;
                    }
                    woken = self
                        .condvar
                        .wait_timeout(woken, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn lock_woken(&self) -> MutexGuard<'_, bool> {
        self.woken.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handoff cell shared between a parked task and whoever claims it.
///
/// A parked sender's slot starts full and is emptied by the receiver that
/// claims it. A parked receiver's slot starts empty and is filled by the
/// claiming sender. `close` claims without touching the slot.
pub(crate) struct Slot<T>(Mutex<Option<T>>);

impl<T> Slot<T> {
    pub(crate) fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Slot(Mutex::new(value)))
    }

    pub(crate) fn put(&self, value: T) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
