//! Settle-once promises and the combinators that compose them.
//!
//! A [`Promise`] moves from pending to fulfilled or rejected exactly once.
//! Callbacks registered with [`Promise::then`] and friends run on a caller
//! chosen [`Context`], whether they were registered before or after the
//! promise settled. [`all`], [`race`], [`zip`], [`delay`], [`timeout`],
//! [`retry`] and the `add_timeout`/`recover`/`always` methods build new
//! promises purely through that public contract.
//!
//! Combinators never cancel work: a losing branch of a race or a timed-out
//! promise keeps running, its outcome just goes unobserved.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{all, delay, Context, Error, Promise};
//! use futures::executor::block_on;
//! use std::time::Duration;
//!
//! let ctx = Context::default();
//! let slow = delay::<Error>(&ctx, Duration::from_millis(20)).map(&ctx, |()| 1);
//! let fast = Promise::fulfilled(2);
//! let both = all(vec![slow, fast]).add_timeout(&ctx, Duration::from_secs(1));
//! assert_eq!(block_on(both.settled()).unwrap(), vec![1, 2]);
//! ```
mod context;
mod control;
mod error;
mod promise;
mod recovery;
mod settled;
mod timing;

pub use context::{Context, Executor, Inline, Job, SerialQueue, Timer, TimerThread};
#[cfg(feature = "tokio")]
pub use context::{TokioExecutor, TokioTimer};
pub use control::{all, race, try_race, zip};
pub use error::{Abandoned, EmptyRace, Error, TimedOut};
pub use promise::{Producer, Promise, State};
pub use recovery::retry;
pub use settled::Settled;
pub use timing::{delay, timeout};
