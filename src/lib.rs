//! # Rendezvous Queues and Select
//!
//! Message-passing concurrency built from one primitive: a bounded,
//! closeable, multi-producer/multi-consumer FIFO queue, plus a `select` that
//! waits on several queues at once.
//!
//! ## Pattern 1: Buffered and Unbuffered Queues
//! - `RendezvousQueue::new(n)` buffers up to `n` values
//! - Capacity `0` is a rendezvous: sender and receiver meet
//! - `send` / `recv` block, `try_send` / `try_recv` never do
//! - `send_timeout` / `recv_timeout` give up after a deadline
//!
//! ## Pattern 2: Closing and Draining
//! - `close` is one-way; closing twice is a bug and panics
//! - Buffered values survive `close`
//! - `recv` returns `None` once closed and drained
//! - `for value in &queue` ends only after `close`
//!
//! ## Pattern 3: Select
//! - Random choice among ready cases
//! - `default` for a non-blocking poll
//! - `timeout` for bounded waiting
//! - A closed queue makes its receive case ready with `None`
//!
//! ## Pattern 4: Timers
//! - `timer::after` delivers one `Instant` on a queue
//! - `timer::stoppable_after` does the same but can be cancelled
//! - `timer::after_fn` runs a callback and can be stopped
//!
//! ## Pattern 5: Deadlocks
//! - See [`scenarios`] for each hazard reproduced with a probe timeout
//!
//! Run the demos with: `cargo run --bin channel_demo` or
//! `cargo run --bin select_demo [config.toml]`

pub mod config;
pub mod error;
mod parker;
pub mod queue;
pub mod scenarios;
pub mod select;
pub mod timer;

pub use config::DemoConfig;
pub use error::{
    CalcError, ConfigError, RecvTimeoutError, SendTimeoutError, TryRecvError, TrySendError,
    UsageError,
};
pub use queue::{IntoIter, Iter, RendezvousQueue, TryIter};
pub use select::Select;
