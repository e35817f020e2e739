//! Waiting on many promises at once.

use crate::error::Reason;
use crate::promise::{Promise, Reaction, Resolution, Thenable, Upstream, Waitable};
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::sync::Arc;

/// Collects the outcomes of several items into one aggregate promise.
///
/// The aggregate fulfills with every value, in input order, once all items
/// have fulfilled. The first rejection rejects it; later outcomes are ignored.
/// Plain values count as already fulfilled.
///
/// # Examples
///
/// ```
/// use promise_plus::{Promise, Resolution};
///
/// let second = Promise::new();
/// let all = Promise::<i32>::all(vec![
///     Resolution::Value(1),
///     Resolution::Promise(second.clone()),
///     Resolution::Value(3),
/// ]);
/// assert!(all.is_pending());
///
/// second.fulfill(2);
/// assert_eq!(all.value(), Some(vec![1, 2, 3]));
/// ```
pub struct Group<T> {
    promise: Promise<Vec<T>>,
}

struct Slots<T> {
    results: Vec<Option<T>>,
    remaining: usize,
}

/// An item the aggregate still has to hear from.
struct Pending {
    index: usize,
    upstream: Upstream,
    // Where the item delivers to its slot; `None` for foreign thenables.
    scheduler: Option<Arc<dyn Scheduler>>,
}

struct Tally<T> {
    slots: Mutex<Slots<T>>,
    pending: Vec<Pending>,
    aggregate: Promise<Vec<T>>,
}

impl<T: Clone + Send + 'static> Tally<T> {
    fn delivered(&self, index: usize) -> bool {
        let slots = self.slots.lock();
        slots.remaining == 0 || slots.results[index].is_some() || !self.aggregate.is_pending()
    }

    fn fill(&self, index: usize, value: T) {
        let values = {
            let mut slots = self.slots.lock();
            if slots.remaining == 0 || slots.results[index].is_some() {
                return;
            }
            slots.results[index] = Some(value);
            slots.remaining -= 1;
            if slots.remaining > 0 {
                return;
            }
            slots.results.iter_mut().filter_map(Option::take).collect::<Vec<_>>()
        };
        tracing::trace!(len = values.len(), "all items fulfilled");
        self.aggregate.fulfill(values);
    }
}

struct Slot<T> {
    tally: Arc<Tally<T>>,
    index: usize,
}

impl<T: Clone + Send + 'static> Reaction<T> for Slot<T> {
    fn fulfill(self: Box<Self>, value: T) {
        self.tally.fill(self.index, value);
    }

    fn reject(self: Box<Self>, reason: Reason) {
        self.tally.aggregate.reject(reason);
    }
}

impl<T: Clone + Send + 'static> Waitable for Tally<T> {
    fn wait(&self) {
        for item in &self.pending {
            if self.delivered(item.index) {
                continue;
            }
            item.upstream.wait();
            // The item may have settled with its slot still queued.
            if let Some(scheduler) = &item.scheduler {
                scheduler.run_until(&|| self.delivered(item.index));
            }
        }
    }
}

impl<T: Clone + Send + 'static> Group<T> {
    /// Settles `aggregate` from `items`.
    pub fn new<I>(aggregate: Promise<Vec<T>>, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T>>,
    {
        let items: Vec<Resolution<T>> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            aggregate.fulfill(Vec::new());
            return Group { promise: aggregate };
        }

        let pending = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match item {
                Resolution::Value(_) => None,
                Resolution::Promise(promise) => Some(Pending {
                    index,
                    upstream: promise.upstream(),
                    scheduler: Some(Arc::clone(promise.scheduler())),
                }),
                Resolution::Thenable(thenable) => Some(Pending {
                    index,
                    upstream: Upstream::new(thenable),
                    scheduler: None,
                }),
            })
            .collect();
        let tally = Arc::new(Tally {
            slots: Mutex::new(Slots {
                results: items.iter().map(|_| None).collect(),
                remaining: items.len(),
            }),
            pending,
            aggregate: aggregate.clone(),
        });
        for (index, item) in items.into_iter().enumerate() {
            let slot = Box::new(Slot {
                tally: Arc::clone(&tally),
                index,
            });
            match item {
                Resolution::Value(value) => tally.fill(index, value),
                Resolution::Promise(promise) => promise.on_settle(slot),
                Resolution::Thenable(thenable) => thenable.on_settle(slot),
            }
        }
        if aggregate.is_pending() {
            aggregate.follow(Upstream::new(&tally));
        }
        Group { promise: aggregate }
    }

    /// The aggregate promise.
    pub fn promise(&self) -> Promise<Vec<T>> {
        self.promise.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::Group;
    use crate::error::Reason;
    use crate::promise::{Promise, Resolution};
    use crate::scheduler::TaskQueue;

    #[test]
    fn test_empty_input_fulfills_immediately() {
        let all = Promise::<i32>::all(Vec::<Resolution<i32>>::new());
        assert_eq!(all.value(), Some(Vec::new()));
    }

    #[test]
    fn test_plain_values_fulfill_immediately() {
        let all = Promise::<i32>::all(vec![4, 5, 6]);
        assert_eq!(all.value(), Some(vec![4, 5, 6]));
    }

    #[test]
    fn test_keeps_input_order() {
        let first = Promise::<i32>::new();
        let second = Promise::<i32>::new();
        let all = Promise::<i32>::all(vec![
            Resolution::Promise(first.clone()),
            Resolution::Promise(second.clone()),
            Resolution::Value(3),
        ]);
        second.fulfill(2);
        assert!(all.is_pending());
        first.fulfill(1);
        assert_eq!(all.value(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_first_rejection_wins() {
        let first = Promise::<i32>::new();
        let second = Promise::<i32>::new();
        let third = Promise::<i32>::new();
        let all = Promise::<i32>::all(vec![
            Resolution::Promise(first.clone()),
            Resolution::Promise(second.clone()),
            Resolution::Promise(third.clone()),
        ]);
        let reason = Reason::msg("second failed");
        second.reject(reason.clone());
        assert!(all.reason().is_some_and(|r| r.ptr_eq(&reason)));

        third.reject(Reason::msg("third failed"));
        first.fulfill(1);
        assert!(all.reason().is_some_and(|r| r.ptr_eq(&reason)));
    }

    #[test]
    fn test_settled_items_go_through_the_scheduler() {
        let queue = TaskQueue::new();
        let done = Promise::<i32>::with_scheduler(queue.clone());
        done.fulfill(1);
        let group = Group::<i32>::new(
            Promise::with_scheduler(queue.clone()),
            vec![Resolution::Promise(done), Resolution::Value(2)],
        );
        let all = group.promise();
        assert!(all.is_pending());
        assert_eq!(all.sync().unwrap(), vec![1, 2]);
    }
}
