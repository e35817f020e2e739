use crate::error::Reason;
use crate::promise::Promise;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A `Waiter` is a future that completes when its promise settles. Any number
/// of waiters may exist for one promise, on any thread.
///
/// # Examples
///
/// ```
/// use promise_plus::Promise;
/// use futures::executor::block_on;
/// use std::thread;
/// let promise = Promise::<String>::new();
/// let waiter = promise.waiter();
///
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", waiter.await);
/// }));
/// promise.fulfill(String::from("Hi"));
/// task1.join().expect("The task1 thread has panicked.");
/// ```
#[derive(Debug)]
pub struct Waiter<T> {
    promise: Promise<T>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn waiter(&self) -> Waiter<T> {
        Waiter { promise: self.clone() }
    }
}

impl<T: Clone + Send + 'static> Future for Waiter<T> {
    type Output = Result<T, Reason>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.promise.shared.state.lock();
        match state.settlement.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, Reason>;
    type IntoFuture = Waiter<T>;

    fn into_future(self) -> Self::IntoFuture {
        Waiter { promise: self }
    }
}
