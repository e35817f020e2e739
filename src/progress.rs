//! Progress notifications.
//!
//! A producer can report intermediate progress on a pending promise. Listeners
//! only hear about it while the promise is pending; the notifications never
//! touch the settlement, and the listeners are dropped once it settles.

use crate::promise::Promise;
use std::any::Any;
use std::sync::Arc;

pub(crate) type Listener = Arc<dyn Fn(&dyn Any) + Send + Sync>;

impl<T: Clone + Send + 'static> Promise<T> {
    /// Registers a progress listener. Ignored if the promise has settled.
    pub fn on_progress<F>(&self, listener: F) -> &Self
    where
        F: Fn(&dyn Any) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.settlement.is_pending() {
            state.listeners.push(Arc::new(listener));
        }
        self
    }

    /// Notifies every listener, in registration order. Ignored if the promise has settled.
    pub fn progress<S: Any>(&self, status: S) {
        let listeners = self.shared.state.lock().listeners.clone();
        for listener in listeners {
            listener(&status as &dyn Any);
        }
    }
}
