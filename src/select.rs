//! Multiplexed wait across several queues.
//!
//! ```
//! use rendezvous_queue::{RendezvousQueue, Select};
//! use std::time::Duration;
//!
//! let numbers = RendezvousQueue::new(1);
//! let words: RendezvousQueue<&str> = RendezvousQueue::new(1);
//! numbers.send(3);
//!
//! let picked = Select::new()
//!     .recv(&numbers, |n| format!("number {:?}", n))
//!     .recv(&words, |w| format!("word {:?}", w))
//!     .timeout(Duration::from_secs(1), || "timeout".to_string())
//!     .wait();
//! assert_eq!(picked, "number Some(3)");
//! ```

use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use log::trace;
use rand::seq::SliceRandom;

use crate::error::{TryRecvError, TrySendError, UsageError};
use crate::parker::{Parker, Slot};
use crate::queue::{deadline_after, RendezvousQueue, State, Waiter};

enum Attempt {
    Done,
    NotReady,
    SendOnClosed,
}

/// One arm of a select. All methods except `fire` run with the queue lock
/// held between `lock` and `unlock`.
trait Case<R> {
    fn addr(&self) -> usize;
    fn lock(&mut self);
    fn unlock(&mut self);
    fn attempt(&mut self) -> Attempt;
    fn register(&mut self, parker: &Arc<Parker>, index: usize);
    fn unregister(&mut self, parker: &Arc<Parker>);
    /// Reads the handoff slot after this case won the parker.
    fn complete(&mut self) -> Attempt;
    fn fire(self: Box<Self>) -> R;
}

// =============================================================================
// Receive case
// =============================================================================

struct RecvCase<'a, T, F> {
    queue: &'a RendezvousQueue<T>,
    guard: Option<MutexGuard<'a, State<T>>>,
    slot: Arc<Slot<T>>,
    received: Option<T>,
    handler: F,
}

impl<'a, T, R, F> Case<R> for RecvCase<'a, T, F>
where
    F: FnOnce(Option<T>) -> R,
{
    fn addr(&self) -> usize {
        self.queue.addr()
    }

    fn lock(&mut self) {
        self.guard = Some(self.queue.lock_state());
    }

    fn unlock(&mut self) {
        self.guard = None;
    }

    fn attempt(&mut self) -> Attempt {
        let state = match self.guard.as_deref_mut() {
            Some(state) => state,
            None => return Attempt::NotReady,
        };
        match state.try_recv() {
            Ok(value) => {
                self.received = Some(value);
                Attempt::Done
            }
            // Closed and drained is a ready case that yields `None`.
            Err(TryRecvError::Closed) => Attempt::Done,
            Err(TryRecvError::Empty) => Attempt::NotReady,
        }
    }

    fn register(&mut self, parker: &Arc<Parker>, index: usize) {
        if let Some(state) = self.guard.as_deref_mut() {
            state.park_receiver(Waiter::new(parker, index, &self.slot));
        }
    }

    fn unregister(&mut self, parker: &Arc<Parker>) {
        if let Some(state) = self.guard.as_deref_mut() {
            state.unregister(parker);
        }
    }

    fn complete(&mut self) -> Attempt {
        self.received = self.slot.take();
        Attempt::Done
    }

    fn fire(self: Box<Self>) -> R {
        let case = *self;
        (case.handler)(case.received)
    }
}

// =============================================================================
// Send case
// =============================================================================

struct SendCase<'a, T, F> {
    queue: &'a RendezvousQueue<T>,
    guard: Option<MutexGuard<'a, State<T>>>,
    value: Option<T>,
    slot: Arc<Slot<T>>,
    handler: F,
}

impl<'a, T, R, F> Case<R> for SendCase<'a, T, F>
where
    F: FnOnce() -> R,
{
    fn addr(&self) -> usize {
        self.queue.addr()
    }

    fn lock(&mut self) {
        self.guard = Some(self.queue.lock_state());
    }

    fn unlock(&mut self) {
        self.guard = None;
    }

    fn attempt(&mut self) -> Attempt {
        let (state, value) = match (self.guard.as_deref_mut(), self.value.take()) {
            (Some(state), Some(value)) => (state, value),
            (_, value) => {
                self.value = value;
                return Attempt::NotReady;
            }
        };
        match state.try_send(value) {
            Ok(()) => Attempt::Done,
            Err(TrySendError::Full(value)) => {
                self.value = Some(value);
                Attempt::NotReady
            }
            Err(TrySendError::Closed(value)) => {
                self.value = Some(value);
                Attempt::SendOnClosed
            }
        }
    }

    fn register(&mut self, parker: &Arc<Parker>, index: usize) {
        if let Some(state) = self.guard.as_deref_mut() {
            if let Some(value) = self.value.take() {
                self.slot.put(value);
                state.park_sender(Waiter::new(parker, index, &self.slot));
            }
        }
    }

    fn unregister(&mut self, parker: &Arc<Parker>) {
        if let Some(state) = self.guard.as_deref_mut() {
            state.unregister(parker);
        }
    }

    fn complete(&mut self) -> Attempt {
        // The receiver empties the slot; `close` leaves the value behind.
        match self.slot.take() {
            None => Attempt::Done,
            Some(value) => {
                self.value = Some(value);
                Attempt::SendOnClosed
            }
        }
    }

    fn fire(self: Box<Self>) -> R {
        let case = *self;
        (case.handler)()
    }
}

// =============================================================================
// Select builder
// =============================================================================

/// Waits on several queue operations at once and runs the handler of
/// exactly one of them.
///
/// When several cases are ready, one is picked uniformly at random. With
/// nothing ready, [`default`](Select::default) runs immediately if given;
/// otherwise the call blocks until a case becomes ready, a watched queue
/// closes, or the [`timeout`](Select::timeout) elapses.
///
/// Each queue may appear in at most one case.
pub struct Select<'a, R> {
    cases: Vec<Box<dyn Case<R> + 'a>>,
    default: Option<Box<dyn FnOnce() -> R + 'a>>,
    timeout: Option<(Instant, Box<dyn FnOnce() -> R + 'a>)>,
}

impl<'a, R> Select<'a, R> {
    pub fn new() -> Self {
        Select {
            cases: Vec::new(),
            default: None,
            timeout: None,
        }
    }

    /// Adds a receive case. The handler gets `None` if the queue is closed
    /// and drained.
    pub fn recv<T, F>(mut self, queue: &'a RendezvousQueue<T>, handler: F) -> Self
    where
        T: 'a,
        F: FnOnce(Option<T>) -> R + 'a,
    {
        self.cases.push(Box::new(RecvCase {
            queue,
            guard: None,
            slot: Slot::new(None),
            received: None,
            handler,
        }));
        self
    }

    /// Adds a send case. If another case wins, `value` is dropped unsent.
    ///
    /// Waiting on a closed queue with a send case panics, just like
    /// [`RendezvousQueue::send`].
    pub fn send<T, F>(mut self, queue: &'a RendezvousQueue<T>, value: T, handler: F) -> Self
    where
        T: 'a,
        F: FnOnce() -> R + 'a,
    {
        self.cases.push(Box::new(SendCase {
            queue,
            guard: None,
            value: Some(value),
            slot: Slot::new(None),
            handler,
        }));
        self
    }

    /// Runs `handler` instead of blocking when no case is ready.
    pub fn default<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        self.default = Some(Box::new(handler));
        self
    }

    /// Runs `handler` if no case becomes ready within `after`. Replaces any
    /// earlier timeout.
    pub fn timeout<F>(mut self, after: Duration, handler: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        // A deadline past the end of time never fires.
        self.timeout = deadline_after(after).map(|deadline| {
            let handler: Box<dyn FnOnce() -> R + 'a> = Box::new(handler);
            (deadline, handler)
        });
        self
    }

    /// Resolves exactly one case (or the default, or the timeout) and returns
    /// its handler's result.
    ///
    /// # Panics
    ///
    /// Panics if a queue appears in two cases, or if the resolved case is a
    /// send on a closed queue.
    pub fn wait(mut self) -> R {
        let mut poll_order: Vec<usize> = (0..self.cases.len()).collect();
        poll_order.shuffle(&mut rand::thread_rng());

        let mut lock_order = poll_order.clone();
        lock_order.sort_by_key(|&index| self.cases[index].addr());
        if lock_order
            .windows(2)
            .any(|pair| self.cases[pair[0]].addr() == self.cases[pair[1]].addr())
        {
            panic!("a queue may appear in at most one select case");
        }

        // Pass 1: everything locked, poll in random order.
        for &index in &lock_order {
            self.cases[index].lock();
        }
        for &index in &poll_order {
            match self.cases[index].attempt() {
                Attempt::Done => {
                    self.unlock_all();
                    trace!("select resolved case {} without parking", index);
                    return self.fire(index);
                }
                Attempt::SendOnClosed => {
                    self.unlock_all();
                    panic!("{}", UsageError::SendOnClosed);
                }
                Attempt::NotReady => {}
            }
        }
        if let Some(default) = self.default.take() {
            self.unlock_all();
            return default();
        }

        // Pass 2: register on every queue before any lock is released, so no
        // wake-up can slip between polling and parking.
        let parker = Parker::new();
        for &index in &lock_order {
            self.cases[index].register(&parker, index);
        }
        self.unlock_all();

        let deadline = self.timeout.as_ref().map(|(deadline, _)| *deadline);
        trace!("select parked on {} case(s)", self.cases.len());
        let selected = parker.park(deadline);

        for case in &mut self.cases {
            case.lock();
            case.unregister(&parker);
            case.unlock();
        }

        match selected {
            Some(index) => match self.cases[index].complete() {
                Attempt::SendOnClosed => panic!("{}", UsageError::SendOnClosed),
                Attempt::Done | Attempt::NotReady => {
                    trace!("select resolved case {} after parking", index);
                    self.fire(index)
                }
            },
            None => match self.timeout.take() {
                Some((_, handler)) => {
                    trace!("select timed out");
                    handler()
                }
                None => unreachable!("parked without a deadline but was never claimed"),
            },
        }
    }

    fn unlock_all(&mut self) {
        for case in &mut self.cases {
            case.unlock();
        }
    }

    fn fire(mut self, index: usize) -> R {
        self.cases.swap_remove(index).fire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecvTimeoutError;
    use itertools::Itertools;
    use std::thread;

    const PROBE: Duration = Duration::from_millis(50);

    #[test]
    fn test_picks_the_ready_case() {
        let first: RendezvousQueue<i32> = RendezvousQueue::new(1);
        let second = RendezvousQueue::new(1);
        let third: RendezvousQueue<i32> = RendezvousQueue::new(1);
        second.send(20);

        let picked = Select::new()
            .recv(&first, |_| "first")
            .recv(&second, |v| {
                assert_eq!(v, Some(20));
                "second"
            })
            .recv(&third, |_| "third")
            .default(|| "none")
            .wait();
        assert_eq!(picked, "second");
        assert!(second.is_empty());
    }

    #[test]
    fn test_default_when_nothing_ready() {
        let queue: RendezvousQueue<i32> = RendezvousQueue::new(1);
        let full = RendezvousQueue::new(1);
        full.send(0);

        let picked = Select::new()
            .recv(&queue, |_| 1)
            .send(&full, 5, || 2)
            .default(|| 3)
            .wait();
        assert_eq!(picked, 3);
        // The losing send case must not have slipped its value in.
        assert_eq!(full.len(), 1);
        assert_eq!(full.recv(), Some(0));
    }

    #[test]
    fn test_every_ready_case_gets_picked() {
        let queues: Vec<RendezvousQueue<usize>> = (0..3).map(|_| RendezvousQueue::new(1)).collect();
        for (i, queue) in queues.iter().enumerate() {
            queue.send(i);
        }

        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            let mut select = Select::new();
            for (i, queue) in queues.iter().enumerate() {
                select = select.recv(queue, move |_| i);
            }
            let picked = select.wait();
            counts[picked] += 1;
            queues[picked].send(picked);
        }
        for count in counts {
            assert!(count > 0, "a ready case starved: {:?}", counts);
        }
    }

    #[test]
    fn test_blocks_until_value_arrives() {
        let idle: RendezvousQueue<&str> = RendezvousQueue::new(0);
        let busy = RendezvousQueue::new(0);

        let sender = {
            let busy = busy.clone();
            thread::spawn(move || {
                thread::sleep(PROBE);
                busy.send("late");
            })
        };

        let picked = Select::new()
            .recv(&idle, |v| v)
            .recv(&busy, |v| v)
            .wait();
        assert_eq!(picked, Some("late"));
        sender.join().unwrap();
    }

    #[test]
    fn test_close_wakes_with_none() {
        let queue: RendezvousQueue<i32> = RendezvousQueue::new(1);
        let closer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(PROBE);
                queue.close();
            })
        };

        let picked = Select::new().recv(&queue, |v| v).wait();
        assert_eq!(picked, None);
        closer.join().unwrap();
    }

    #[test]
    fn test_timeout_fires_when_idle() {
        let queue: RendezvousQueue<i32> = RendezvousQueue::new(1);
        let started = Instant::now();
        let picked = Select::new()
            .recv(&queue, |_| false)
            .timeout(PROBE, || true)
            .wait();
        assert!(picked);
        assert!(started.elapsed() >= PROBE);
    }

    #[test]
    fn test_timeout_ignored_when_case_ready() {
        let queue = RendezvousQueue::new(1);
        queue.send(1);
        let picked = Select::new()
            .recv(&queue, |v| v)
            .timeout(Duration::ZERO, || None)
            .wait();
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn test_timeout_only_select() {
        let picked: u8 = Select::new().timeout(Duration::from_millis(5), || 9).wait();
        assert_eq!(picked, 9);
    }

    #[test]
    fn test_send_case_to_parked_receiver() {
        let queue = RendezvousQueue::unbuffered();
        let receiver = {
            let queue = queue.clone();
            thread::spawn(move || queue.recv())
        };
        thread::sleep(PROBE);

        let sent = Select::new().send(&queue, 11, || true).default(|| false).wait();
        assert!(sent);
        assert_eq!(receiver.join().unwrap(), Some(11));
    }

    #[test]
    fn test_parked_send_case_completes_on_receive() {
        let queue = RendezvousQueue::unbuffered();
        let receiver = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(PROBE);
                queue.recv()
            })
        };

        let sent = Select::new().send(&queue, "hi", || "sent").wait();
        assert_eq!(sent, "sent");
        assert_eq!(receiver.join().unwrap(), Some("hi"));
    }

    #[test]
    fn test_losing_parked_send_case_is_withdrawn() {
        let outbound = RendezvousQueue::unbuffered();
        let inbound = RendezvousQueue::unbuffered();

        let sender = {
            let inbound = inbound.clone();
            thread::spawn(move || {
                thread::sleep(PROBE);
                inbound.send(1);
            })
        };

        let picked = Select::new()
            .send(&outbound, 99, || "sent")
            .recv(&inbound, |_| "received")
            .wait();
        assert_eq!(picked, "received");
        sender.join().unwrap();
        assert_eq!(outbound.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_parked_send_case_on_full_buffer() {
        let queue = RendezvousQueue::new(1);
        queue.send(1);

        let sender = {
            let queue = queue.clone();
            thread::spawn(move || Select::new().send(&queue, 2, || "sent").wait())
        };
        thread::sleep(PROBE);
        assert_eq!(queue.len(), 1);

        // Receiving frees a buffer slot; the parked case's value moves in.
        assert_eq!(queue.recv(), Some(1));
        assert_eq!(sender.join().unwrap(), "sent");
        assert_eq!(queue.len(), 1);
        queue.close();
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec![2]);
    }

    // Producers offer each value to two queues at once and retry on timeout;
    // consumers drain with select, deadline and non-blocking receives. Every
    // value must arrive exactly once.
    fn contended_transfer(left_capacity: usize, right_capacity: usize) {
        const PRODUCERS: usize = 3;
        const PER_PRODUCER: usize = 500;
        const RETRY: Duration = Duration::from_millis(1);

        let left = RendezvousQueue::new(left_capacity);
        let right = RendezvousQueue::new(right_capacity);

        let received = crossbeam::thread::scope(|s| {
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|producer| {
                    let (left, right) = (&left, &right);
                    s.spawn(move |_| {
                        for i in 0..PER_PRODUCER {
                            let value = producer * PER_PRODUCER + i;
                            while !Select::new()
                                .send(left, value, || true)
                                .send(right, value, || true)
                                .timeout(RETRY, || false)
                                .wait()
                            {}
                        }
                    })
                })
                .collect();

            let by_select = s.spawn(|_| {
                let mut open = [true, true];
                let mut got = Vec::new();
                while open.iter().any(|&o| o) {
                    let mut select = Select::new();
                    if open[0] {
                        select = select.recv(&left, |v| (0, v));
                    }
                    if open[1] {
                        select = select.recv(&right, |v| (1, v));
                    }
                    match select.wait() {
                        (_, Some(value)) => got.push(value),
                        (index, None) => open[index] = false,
                    }
                }
                got
            });

            let by_deadline = s.spawn(|_| {
                let mut open = [true, true];
                let mut got = Vec::new();
                while open.iter().any(|&o| o) {
                    for (index, queue) in [&left, &right].into_iter().enumerate() {
                        if !open[index] {
                            continue;
                        }
                        match queue.recv_timeout(RETRY) {
                            Ok(value) => got.push(value),
                            Err(RecvTimeoutError::Closed) => open[index] = false,
                            Err(RecvTimeoutError::Timeout) => {}
                        }
                    }
                }
                got
            });

            let by_polling = s.spawn(|_| {
                let mut open = [true, true];
                let mut got = Vec::new();
                while open.iter().any(|&o| o) {
                    for (index, queue) in [&left, &right].into_iter().enumerate() {
                        if !open[index] {
                            continue;
                        }
                        match queue.try_recv() {
                            Ok(value) => got.push(value),
                            Err(TryRecvError::Closed) => open[index] = false,
                            Err(TryRecvError::Empty) => thread::yield_now(),
                        }
                    }
                }
                got
            });

            for producer in producers {
                producer.join().unwrap();
            }
            left.close();
            right.close();

            [by_select, by_deadline, by_polling]
                .into_iter()
                .flat_map(|consumer| consumer.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        assert_eq!(
            received.into_iter().sorted().collect::<Vec<_>>(),
            (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_contended_transfer_unbuffered() {
        contended_transfer(0, 0);
    }

    #[test]
    fn test_contended_transfer_mixed_capacity() {
        contended_transfer(0, 3);
    }

    #[test]
    fn test_contended_transfer_buffered() {
        contended_transfer(2, 5);
    }

    #[test]
    fn test_mixed_element_types() {
        let numbers: RendezvousQueue<u64> = RendezvousQueue::new(1);
        let names = RendezvousQueue::new(1);
        names.send(String::from("gopher"));

        let picked = Select::new()
            .recv(&numbers, |n| n.map(|n| n.to_string()))
            .recv(&names, |name| name)
            .wait();
        assert_eq!(picked.as_deref(), Some("gopher"));
    }

    #[test]
    #[should_panic(expected = "send on closed queue")]
    fn test_send_case_on_closed_queue_panics() {
        let queue = RendezvousQueue::new(1);
        queue.close();
        Select::new().send(&queue, 1, || ()).default(|| ()).wait();
    }

    #[test]
    #[should_panic(expected = "at most one select case")]
    fn test_same_queue_twice_panics() {
        let queue: RendezvousQueue<i32> = RendezvousQueue::new(1);
        Select::new()
            .recv(&queue, |_| ())
            .send(&queue, 1, || ())
            .wait();
    }
}
