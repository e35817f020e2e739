//! One link of a promise chain.
//!
//! A [`Callback`] pairs the handlers passed to `then` with the promise `then`
//! returned. When the upstream settles, exactly one handler runs (or the
//! outcome is forwarded untouched if that handler is missing) and the result
//! settles the downstream promise.

use crate::error::{Error, Reason};
use crate::promise::{Promise, Reaction, Resolution, Upstream};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Handler run with the upstream value.
pub type FulfillHandler<T, U> = Box<dyn FnOnce(T) -> Result<Resolution<U>, Reason> + Send>;

/// Handler run with the upstream rejection.
pub type RejectHandler<U> = Box<dyn FnOnce(Reason) -> Result<Resolution<U>, Reason> + Send>;

pub(crate) enum OnFulfill<T, U> {
    Handler(FulfillHandler<T, U>),
    /// No handler: the value is converted and passed on.
    Forward(fn(T) -> U),
}

pub struct Callback<T, U> {
    on_fulfill: OnFulfill<T, U>,
    on_reject: Option<RejectHandler<U>>,
    next: Promise<U>,
}

impl<T, U: Clone + Send + 'static> Callback<T, U> {
    pub(crate) fn new(on_fulfill: OnFulfill<T, U>, on_reject: Option<RejectHandler<U>>, next: Promise<U>) -> Self {
        Callback {
            on_fulfill,
            on_reject,
            next,
        }
    }
}

impl<T, U> Reaction<T> for Callback<T, U>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
{
    fn fulfill(self: Box<Self>, value: T) {
        let Callback { on_fulfill, next, .. } = *self;
        match on_fulfill {
            OnFulfill::Handler(handler) => forward(&next, guarded(move || handler(value))),
            OnFulfill::Forward(convert) => {
                next.fulfill(Resolution::Value(convert(value)));
            }
        }
    }

    fn reject(self: Box<Self>, reason: Reason) {
        let Callback { on_reject, next, .. } = *self;
        match on_reject {
            Some(handler) => forward(&next, guarded(move || handler(reason))),
            None => {
                next.reject(reason);
            }
        }
    }

    fn follow(&self, upstream: Upstream) {
        Reaction::follow(&self.next, upstream);
    }
}

fn forward<U: Clone + Send + 'static>(next: &Promise<U>, result: Result<Resolution<U>, Reason>) {
    match result {
        Ok(resolution) => {
            next.fulfill(resolution);
        }
        Err(reason) => {
            next.reject(reason);
        }
    }
}

// Runs a handler, turning a panic into a rejection.
fn guarded<U>(handler: impl FnOnce() -> Result<Resolution<U>, Reason>) -> Result<Resolution<U>, Reason> {
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(%message, "promise handler panicked");
            Err(Reason::from(Error::Panicked(message)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

#[cfg(test)]
mod tests {
    use super::{Callback, OnFulfill};
    use crate::error::{Error, Reason};
    use crate::promise::{Promise, Reaction, Resolution};

    fn callback<U: Clone + Send + 'static>(
        on_fulfill: OnFulfill<i32, U>,
        on_reject: Option<super::RejectHandler<U>>,
    ) -> (Box<Callback<i32, U>>, Promise<U>) {
        let next = Promise::new();
        (Box::new(Callback::new(on_fulfill, on_reject, next.clone())), next)
    }

    #[test]
    fn test_handler_value_fulfills_next() {
        let (cb, next) = callback::<String>(
            OnFulfill::Handler(Box::new(|v| Ok(Resolution::Value(v.to_string())))),
            None,
        );
        cb.fulfill(12);
        assert_eq!(next.value().as_deref(), Some("12"));
    }

    #[test]
    fn test_handler_error_rejects_next() {
        let (cb, next) = callback::<i32>(OnFulfill::Handler(Box::new(|_| Err(Reason::msg("nope")))), None);
        cb.fulfill(1);
        assert_eq!(next.reason().map(|r| r.to_string()).as_deref(), Some("nope"));
    }

    #[test]
    fn test_handler_panic_rejects_next() {
        let (cb, next) = callback::<i32>(OnFulfill::Handler(Box::new(|_| panic!("exploded"))), None);
        cb.fulfill(1);
        let reason = next.reason().expect("rejected");
        assert!(matches!(reason.downcast_ref::<Error>(), Some(Error::Panicked(m)) if m == "exploded"));
    }

    #[test]
    fn test_missing_handlers_pass_through() {
        let (cb, next) = callback::<i32>(OnFulfill::Forward(std::convert::identity), None);
        cb.fulfill(8);
        assert_eq!(next.value(), Some(8));

        let reason = Reason::msg("upstream");
        let (cb, next) = callback::<i32>(OnFulfill::Forward(std::convert::identity), None);
        cb.reject(reason.clone());
        assert!(next.reason().is_some_and(|r| r.ptr_eq(&reason)));
    }

    #[test]
    fn test_reject_handler_recovers() {
        let (cb, next) = callback::<i32>(
            OnFulfill::Forward(std::convert::identity),
            Some(Box::new(|_| Ok(Resolution::Value(0)))),
        );
        cb.reject(Reason::msg("lost"));
        assert_eq!(next.value(), Some(0));
    }

    #[test]
    fn test_handler_can_return_a_promise() {
        let inner = Promise::<i32>::new();
        let returned = inner.clone();
        let (cb, next) = callback::<i32>(
            OnFulfill::Handler(Box::new(move |_| Ok(Resolution::Promise(returned)))),
            None,
        );
        cb.fulfill(1);
        assert!(next.is_pending());
        inner.fulfill(99);
        assert_eq!(next.value(), Some(99));
    }
}
