//! One-shot timers built on queues.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::queue::RendezvousQueue;
use crate::select::Select;

/// Returns a queue that receives the current `Instant` once, after
/// `duration`. Use it as a receive case to bound a select loop.
///
/// The background thread waits out the whole `duration` even if the queue
/// is dropped first. For long waits that may be abandoned, use
/// [`stoppable_after`] and stop the timer.
pub fn after(duration: Duration) -> RendezvousQueue<Instant> {
    let (_timer, queue) = stoppable_after(duration);
    queue
}

/// Like [`after`], but [`Timer::stop`] cancels the tick and ends the
/// background thread right away.
pub fn stoppable_after(duration: Duration) -> (Timer, RendezvousQueue<Instant>) {
    let queue = RendezvousQueue::new(1);
    let sender = queue.clone();
    let timer = after_fn(duration, move || {
        // Capacity 1 and a single send: this never finds the queue full.
        let _ = sender.try_send(Instant::now());
    });
    (timer, queue)
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const STOPPED: u8 = 2;

/// Handle returned by [`after_fn`].
pub struct Timer {
    state: Arc<AtomicU8>,
    stop: RendezvousQueue<()>,
}

/// Runs `f` on a background thread after `duration`, unless the returned
/// [`Timer`] is stopped first.
pub fn after_fn<F>(duration: Duration, f: F) -> Timer
where
    F: FnOnce() + Send + 'static,
{
    let state = Arc::new(AtomicU8::new(PENDING));
    let stop = RendezvousQueue::unbuffered();

    let timer = Timer {
        state: Arc::clone(&state),
        stop: stop.clone(),
    };

    thread::spawn(move || {
        let elapsed = Select::new()
            .recv(&stop, |_| false)
            .timeout(duration, || true)
            .wait();
        if elapsed
            && state
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            debug!("timer fired after {:?}", duration);
            f();
        }
    });

    timer
}

impl Timer {
    /// Prevents the timer from firing. Returns `false` if it already fired or
    /// was already stopped.
    pub fn stop(&self) -> bool {
        let stopped = self
            .state
            .compare_exchange(PENDING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if stopped {
            // Wakes the timer thread early. Only the first stop gets here.
            let _ = self.stop.try_close();
        }
        stopped
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}
