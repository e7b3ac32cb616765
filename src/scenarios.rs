//! The classic channel demonstrations as functions that return what they
//! observed. The demo binaries print these reports; the tests assert on them.
//!
//! Scenarios that would block forever take a `probe` duration. When the probe
//! expires the scenario reports [`Outcome::Blocked`], closes its queues so
//! every helper thread exits, and joins them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::{CalcError, RecvTimeoutError};
use crate::queue::RendezvousQueue;
use crate::select::Select;
use crate::timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Blocked,
}

impl<T> Outcome<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Outcome::Blocked)
    }
}

// =============================================================================
// Milestone 1: Buffered read-back and draining a closed queue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChanReport {
    pub first: i32,
    pub second: i32,
    pub len: usize,
    pub cap: usize,
}

/// Fills a buffered queue with `1..=capacity`, reads two values back and
/// reports what is left. Returns `None` if `capacity < 2` or the values
/// would not fit in an `i32`.
pub fn read_chan(capacity: usize) -> Option<ReadChanReport> {
    if capacity < 2 {
        return None;
    }
    let last = i32::try_from(capacity).ok()?;
    let queue = RendezvousQueue::new(capacity);
    for value in 1..=last {
        queue.send(value);
    }
    let first = queue.recv()?;
    let second = queue.recv()?;
    Some(ReadChanReport {
        first,
        second,
        len: queue.len(),
        cap: queue.capacity(),
    })
}

/// A queue preloaded with `0..n` and already closed.
pub fn int_queue(n: usize) -> RendezvousQueue<usize> {
    let queue = RendezvousQueue::new(n);
    for i in 0..n {
        queue.send(i);
    }
    queue.close();
    queue
}

pub fn print_in_chan(n: usize) -> Vec<usize> {
    int_queue(n).iter().collect()
}

// =============================================================================
// Milestone 2: Deadlock patterns
// =============================================================================

/// Unbuffered send with a receiver on another thread: completes.
pub fn handoff_with_sender(value: i32) -> Option<i32> {
    let queue = RendezvousQueue::unbuffered();
    let sender = {
        let queue = queue.clone();
        thread::spawn(move || queue.send(value))
    };
    let received = queue.recv();
    sender.join().ok()?;
    received
}

/// Unbuffered send with nobody receiving: blocks for good.
pub fn send_without_receiver(probe: Duration) -> Outcome<()> {
    let queue = RendezvousQueue::unbuffered();
    match queue.send_timeout(2, probe) {
        Ok(()) => Outcome::Completed(()),
        Err(_) => Outcome::Blocked,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanReport {
    pub received: Option<i32>,
    pub helper: Outcome<()>,
}

/// The helper sends on two unbuffered queues but the caller only receives
/// from the first. The caller finishes; the helper is left blocked.
pub fn orphaned_sender(probe: Duration) -> OrphanReport {
    let first = RendezvousQueue::unbuffered();
    let second = RendezvousQueue::unbuffered();

    let helper = {
        let first = first.clone();
        let second = second.clone();
        thread::spawn(move || {
            if first.send_timeout(2, probe).is_err() {
                return Outcome::Blocked;
            }
            match second.send_timeout(1, probe) {
                Ok(()) => Outcome::Completed(()),
                Err(_) => Outcome::Blocked,
            }
        })
    };

    let received = first.recv();
    OrphanReport {
        received,
        helper: helper.join().unwrap_or(Outcome::Blocked),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOrder {
    /// Receive from B then A, the order the sender uses.
    Matched,
    /// Receive from A then B.
    Reversed,
}

/// Two unbuffered queues A and B. A helper sends to B then A while the caller
/// receives in `order`. Returns the two received values in receive order.
pub fn crossed_handoff(order: ReceiveOrder, probe: Duration) -> Outcome<(i32, i32)> {
    let a = RendezvousQueue::unbuffered();
    let b = RendezvousQueue::unbuffered();

    let sender = {
        let a = a.clone();
        let b = b.clone();
        let backstop = probe * 10;
        thread::spawn(move || {
            if b.send_timeout(2, backstop).is_ok() {
                let _ = a.send_timeout(1, backstop);
            }
        })
    };

    let (first, second) = match order {
        ReceiveOrder::Matched => (&b, &a),
        ReceiveOrder::Reversed => (&a, &b),
    };
    let outcome = match first.recv_timeout(probe) {
        Ok(x) => match second.recv_timeout(probe) {
            Ok(y) => Outcome::Completed((x, y)),
            Err(_) => Outcome::Blocked,
        },
        Err(_) => Outcome::Blocked,
    };

    // Release the helper if it is still parked on either queue.
    let _ = a.try_close();
    let _ = b.try_close();
    let _ = sender.join();
    outcome
}

/// Two helpers that each wait on the other: one sends to ch2 then ch1, the
/// other receives from ch1 then ch2. Neither can make progress.
///
/// A program that spawns these and returns at once never notices the hang.
/// This scenario waits for both helpers, so the block is reported.
pub fn mutual_tasks(probe: Duration) -> Outcome<()> {
    let ch1 = RendezvousQueue::unbuffered();
    let ch2 = RendezvousQueue::unbuffered();

    let sender = {
        let ch1 = ch1.clone();
        let ch2 = ch2.clone();
        thread::spawn(move || {
            ch2.send_timeout(2, probe).is_ok() && ch1.send_timeout(1, probe).is_ok()
        })
    };
    let receiver = {
        let ch1 = ch1.clone();
        let ch2 = ch2.clone();
        thread::spawn(move || ch1.recv_timeout(probe).is_ok() && ch2.recv_timeout(probe).is_ok())
    };

    let sent = sender.join().unwrap_or(false);
    let received = receiver.join().unwrap_or(false);
    if sent && received {
        Outcome::Completed(())
    } else {
        Outcome::Blocked
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub drained: Vec<i32>,
    /// Whether the drain loop ended on its own.
    pub terminated: bool,
}

/// Drain-iterates a buffered queue preloaded with `values` on a helper
/// thread. Unless `close_first` is set, the loop never ends on its own.
pub fn drain_with_probe(values: Vec<i32>, close_first: bool, probe: Duration) -> DrainReport {
    let queue = RendezvousQueue::new(values.len());
    for value in &values {
        queue.send(*value);
    }
    if close_first {
        queue.close();
    }

    let progress = RendezvousQueue::new(values.len() + 1);
    let consumer = {
        let queue = queue.clone();
        let progress = progress.clone();
        thread::spawn(move || {
            for value in queue.iter() {
                progress.send(value);
            }
            progress.close();
        })
    };

    let mut drained = Vec::new();
    let terminated = loop {
        match progress.recv_timeout(probe) {
            Ok(value) => drained.push(value),
            Err(RecvTimeoutError::Closed) => break true,
            Err(RecvTimeoutError::Timeout) => break false,
        }
    };

    if !terminated {
        let _ = queue.try_close();
    }
    let _ = consumer.join();
    DrainReport { drained, terminated }
}

// =============================================================================
// Milestone 3: Select patterns
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectPick {
    Candidate { index: usize, element: Option<usize> },
    Default,
}

/// Sends to one of `candidates` queues chosen at random, then selects over
/// all of them with a default. Returns the chosen index and what the select
/// picked.
pub fn select_random_index(candidates: usize) -> Option<(usize, SelectPick)> {
    if candidates == 0 {
        return None;
    }
    let queues: Vec<RendezvousQueue<usize>> =
        (0..candidates).map(|_| RendezvousQueue::new(1)).collect();
    let index = rand::thread_rng().gen_range(0..candidates);
    queues[index].send(index);

    let mut select = Select::new();
    for (i, queue) in queues.iter().enumerate() {
        select = select.recv(queue, move |element| SelectPick::Candidate { index: i, element });
    }
    let pick = select.default(|| SelectPick::Default).wait();
    Some((index, pick))
}

/// Blocks in a select on an empty queue that a timer closes after `delay`.
pub fn close_during_select(delay: Duration) -> Option<i32> {
    let queue = RendezvousQueue::new(1);
    let closer = queue.clone();
    let _timer = timer::after_fn(delay, move || closer.close());
    Select::new().recv(&queue, |value| value).wait()
}

/// Receives from a queue fed with `feed` until a timer queue fires after
/// `deadline`. Returns everything seen before the timeout.
pub fn timeout_loop(feed: Vec<i32>, deadline: Duration) -> Vec<i32> {
    let queue = RendezvousQueue::new(2);
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for value in feed {
                if queue.send_timeout(value, deadline).is_err() {
                    break;
                }
            }
        })
    };

    let timeout = timer::after(deadline);
    let mut seen = Vec::new();
    loop {
        let next = Select::new()
            .recv(&queue, |value| value)
            .recv(&timeout, |_| None)
            .wait();
        match next {
            Some(value) => seen.push(value),
            None => break,
        }
    }

    let _ = queue.try_close();
    let _ = producer.join();
    seen
}

/// Runs `trials` selects over `cases` always-ready queues and counts how
/// often each case won.
pub fn select_fairness(cases: usize, trials: usize) -> Vec<usize> {
    let queues: Vec<RendezvousQueue<usize>> = (0..cases).map(|_| RendezvousQueue::new(1)).collect();
    for (i, queue) in queues.iter().enumerate() {
        queue.send(i);
    }

    let mut counts = vec![0; cases];
    if cases == 0 {
        return counts;
    }
    for _ in 0..trials {
        let mut select = Select::new();
        for (i, queue) in queues.iter().enumerate() {
            select = select.recv(queue, move |_| i);
        }
        let picked = select.wait();
        counts[picked] += 1;
        queues[picked].send(picked);
    }
    counts
}

// =============================================================================
// Milestone 4: Many producers, one consumer
// =============================================================================

/// Every producer sends `per_producer` distinct values; the last one to
/// finish closes the queue so the consumer's drain loop ends. Returns `None`
/// if a producer panicked.
pub fn fan_in(producers: usize, per_producer: usize, capacity: usize) -> Option<Vec<usize>> {
    fan_in_with(producers, capacity, |producer, queue| {
        for i in 0..per_producer {
            queue.send(producer * per_producer + i);
        }
    })
}

/// Closes the queue when the last producer exits, whether it returned or
/// panicked.
struct LastProducerCloses<'a> {
    queue: &'a RendezvousQueue<usize>,
    remaining: &'a AtomicUsize,
}

impl Drop for LastProducerCloses<'_> {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.close();
        }
    }
}

fn fan_in_with<F>(producers: usize, capacity: usize, produce: F) -> Option<Vec<usize>>
where
    F: Fn(usize, &RendezvousQueue<usize>) + Sync,
{
    if producers == 0 {
        return Some(Vec::new());
    }
    let queue = RendezvousQueue::new(capacity);
    let remaining = AtomicUsize::new(producers);

    crossbeam::thread::scope(|s| {
        for producer in 0..producers {
            let queue = &queue;
            let remaining = &remaining;
            let produce = &produce;
            s.spawn(move |_| {
                let _closer = LastProducerCloses { queue, remaining };
                produce(producer, queue);
            });
        }
        queue.iter().collect::<Vec<_>>()
    })
    .ok()
}

// =============================================================================
// Milestone 5: Function values through a queue
// =============================================================================

/// A binary operation passed around as a plain function value.
pub type Operate = fn(i32, i32) -> i32;

/// Applies `op`, rejecting a missing operation up front.
pub fn calculate(x: i32, y: i32, op: Option<Operate>) -> Result<i32, CalcError> {
    let op = op.ok_or(CalcError::InvalidOperation)?;
    Ok(op(x, y))
}

/// Binds `op` into a reusable calculator. The missing-operation check runs on
/// every call, like [`calculate`].
pub fn gen_calculator(op: Option<Operate>) -> impl Fn(i32, i32) -> Result<i32, CalcError> {
    move |x, y| calculate(x, y, op)
}

/// Sends each operation through a closed queue to a worker thread, which
/// applies it to `(x, y)` and reports every result in order. Returns `None`
/// if the worker panicked.
pub fn queued_operations(
    x: i32,
    y: i32,
    ops: Vec<Option<Operate>>,
) -> Option<Vec<Result<i32, CalcError>>> {
    let queue = RendezvousQueue::new(ops.len());
    for op in ops {
        queue.send(op);
    }
    queue.close();

    let worker = thread::spawn(move || {
        queue
            .iter()
            .map(|op| calculate(x, y, op))
            .collect::<Vec<_>>()
    });
    worker.join().ok()
}
