//! Promises/A+ style deferred values for Rust.
//!
//! A [`Promise`] holds a value or a rejection [`Reason`] that becomes
//! available later. Handlers chained with [`Promise::then`] (or the
//! [`and_then`](Promise::and_then), [`map`](Promise::map) and
//! [`rescue`](Promise::rescue) shorthands) produce new promises; a promise
//! fulfilled with another promise adopts its outcome; and [`Promise::all`]
//! joins many promises into one.
//!
//! When callbacks run is up to the promise's [`Scheduler`]: inline with
//! [`Immediate`] (the default), or later with a [`TaskQueue`] that the host
//! drains. [`Promise::sync`] forces a result for callers that cannot chain,
//! and a promise can also be awaited.
//!
//! ```
//! use promise_plus::{Promise, Reason, Resolution, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let request = Promise::<u16>::with_scheduler(queue.clone());
//! let body = request
//!     .and_then(|status| match status {
//!         200 => Ok(Resolution::Value("ok")),
//!         _ => Err(Reason::msg(format!("status {status}"))),
//!     })
//!     .rescue(|_| Ok(Resolution::Value("fallback")));
//!
//! request.fulfill(503);
//! assert!(body.is_pending());
//! assert_eq!(body.sync().unwrap(), "fallback");
//! ```

pub mod callback;
pub mod error;
pub mod group;
pub mod progress;
pub mod promise;
pub mod scheduler;
pub mod waiter;

pub use callback::{Callback, FulfillHandler, RejectHandler};
pub use error::{Error, Reason};
pub use group::Group;
pub use promise::{Promise, Reaction, Resolution, Settlement, Thenable, Upstream, Waitable};
pub use scheduler::{Immediate, Scheduler, Task, TaskQueue};
pub use waiter::Waiter;
