//! The promise state machine.
//!
//! A [`Promise`] starts pending and settles exactly once, either fulfilled
//! with a value or rejected with a [`Reason`]. Work registered with
//! [`Promise::then`] and friends is queued as a [`Reaction`] and handed to the
//! promise's [`Scheduler`] once the outcome is known.
//!
//! Fulfilling a promise with another promise (or anything implementing
//! [`Thenable`]) makes it adopt that outcome instead, however deeply the
//! promises are nested.
//!
//! # Examples
//!
//! ```
//! use promise_plus::{Promise, Resolution};
//!
//! let source = Promise::new();
//! let doubled = source.map(|v: i32| v * 2);
//! let described = doubled.and_then(|v| Ok(Resolution::Value(format!("got {v}"))));
//!
//! source.fulfill(21);
//! assert_eq!(described.sync().unwrap(), "got 42");
//! ```

use crate::callback::{Callback, FulfillHandler, OnFulfill, RejectHandler};
use crate::error::{Error, Reason};
use crate::progress::Listener;
use crate::scheduler::{self, Scheduler};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::task::Waker;

/// Where a promise is in its lifecycle.
#[derive(Debug, Clone)]
pub enum Settlement<T> {
    Pending,
    Fulfilled(T),
    Rejected(Reason),
}

impl<T> Settlement<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending)
    }

    /// The fixed outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, Reason>>
    where
        T: Clone,
    {
        match self {
            Settlement::Pending => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

/// What a promise can be fulfilled with: a plain value, or something whose
/// outcome it should adopt.
pub enum Resolution<T> {
    Value(T),
    Promise(Promise<T>),
    Thenable(Arc<dyn Thenable<T>>),
}

impl<T> From<T> for Resolution<T> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T> From<Promise<T>> for Resolution<T> {
    fn from(promise: Promise<T>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: Clone + Send + 'static> Resolution<T> {
    /// Applies `f` to the value now if it is plain, or once it arrives otherwise.
    pub fn map_value<U, F>(self, f: F) -> Resolution<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Resolution::Value(value) => Resolution::Value(f(value)),
            Resolution::Promise(promise) => Resolution::Promise(promise.map(f)),
            thenable @ Resolution::Thenable(_) => {
                Resolution::Promise(Promise::<T>::resolve(thenable).map(f))
            }
        }
    }

    /// Returns a plain value as is and forces a deferred one with [`Promise::sync`].
    pub fn sync(self) -> Result<T, Error> {
        match self {
            Resolution::Value(value) => Ok(value),
            Resolution::Promise(promise) => promise.sync(),
            thenable @ Resolution::Thenable(_) => Promise::<T>::resolve(thenable).sync(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Something that can be waited on while a dependent promise is blocked on it.
pub trait Waitable: Send + Sync {
    /// Tries to make progress towards settling.
    fn wait(&self);

    /// What this is itself waiting on, if anything.
    fn waiting_on(&self) -> Option<Upstream> {
        None
    }
}

/// A weak handle to whatever a pending promise is waiting on.
///
/// It never keeps the upstream alive: the upstream owns its dependents through
/// its reaction list, not the other way round.
#[derive(Clone)]
pub struct Upstream {
    id: usize,
    target: Arc<dyn Link>,
}

// Type-erased weak reference, so trait objects such as `dyn Thenable<T>` can
// be followed without upcasting them to `dyn Waitable`.
trait Link: Send + Sync {
    fn wait(&self);

    fn waiting_on(&self) -> Option<Upstream>;
}

impl<W: Waitable + ?Sized> Link for Weak<W> {
    fn wait(&self) {
        if let Some(target) = self.upgrade() {
            target.wait();
        }
    }

    fn waiting_on(&self) -> Option<Upstream> {
        self.upgrade()?.waiting_on()
    }
}

impl Upstream {
    pub fn new<W: Waitable + ?Sized + 'static>(target: &Arc<W>) -> Self {
        Upstream {
            id: Arc::as_ptr(target).cast::<()>() as usize,
            target: Arc::new(Arc::downgrade(target)),
        }
    }

    /// True if both handles point at the same upstream.
    pub fn is(&self, other: &Upstream) -> bool {
        self.id == other.id
    }

    pub fn wait(&self) {
        self.target.wait();
    }

    fn waiting_on(&self) -> Option<Upstream> {
        self.target.waiting_on()
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Upstream").field(&format_args!("{:#x}", self.id)).finish()
    }
}

/// The consuming end of a settlement: receives the outcome exactly once.
pub trait Reaction<T>: Send {
    fn fulfill(self: Box<Self>, value: T);

    fn reject(self: Box<Self>, reason: Reason);

    /// Called when the reaction is queued on a pending upstream.
    fn follow(&self, _upstream: Upstream) {}
}

/// Anything a promise can adopt the outcome of.
///
/// Implementations must hand a reaction registered after settlement to their
/// scheduler right away, and must deliver each reaction's outcome at most once.
pub trait Thenable<T>: Waitable {
    /// The outcome, or `None` while unsettled.
    fn outcome(&self) -> Option<Result<T, Reason>>;

    fn is_settled(&self) -> bool {
        self.outcome().is_some()
    }

    /// Delivers the outcome to `reaction` once it is known.
    fn on_settle(&self, reaction: Box<dyn Reaction<T>>);
}

pub(crate) struct State<T> {
    pub(crate) settlement: Settlement<T>,
    pub(crate) waiting_on: Option<Upstream>,
    pub(crate) reactions: Vec<Box<dyn Reaction<T>>>,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) wakers: Vec<Waker>,
}

pub(crate) struct Shared<T> {
    pub(crate) state: Mutex<State<T>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn is_pending(&self) -> bool {
        self.state.lock().settlement.is_pending()
    }
}

impl<T: Clone + Send + 'static> Waitable for Shared<T> {
    fn wait(&self) {
        self.scheduler.run_until(&|| !self.is_pending());
        while let Some(source) = self.waiting_on() {
            source.wait();
            // No progress upstream, nothing else will change it from here.
            if matches!(self.waiting_on(), Some(now) if now.is(&source)) {
                break;
            }
        }
    }

    fn waiting_on(&self) -> Option<Upstream> {
        self.state.lock().waiting_on.clone()
    }
}

/// A value or failure that becomes available later.
///
/// Clones are handles to the same promise.
pub struct Promise<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// A pending promise on the default scheduler.
    pub fn new() -> Self {
        Self::with_scheduler(scheduler::default())
    }

    /// A pending promise whose callbacks run on `scheduler`.
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Promise {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    settlement: Settlement::Pending,
                    waiting_on: None,
                    reactions: Vec::new(),
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                scheduler,
            }),
        }
    }

    pub fn fulfilled(value: T) -> Self {
        let promise = Self::new();
        promise.fulfill(value);
        promise
    }

    pub fn rejected(reason: impl Into<Reason>) -> Self {
        let promise = Self::new();
        promise.reject(reason);
        promise
    }

    /// Returns a promise unchanged, and wraps anything else in a promise fulfilled with it.
    pub fn resolve(value: impl Into<Resolution<T>>) -> Self {
        match value.into() {
            Resolution::Promise(promise) => promise,
            other => {
                let promise = Self::new();
                promise.fulfill(other);
                promise
            }
        }
    }

    /// One promise for all `items`, see [`Group`](crate::Group).
    pub fn all<I>(items: I) -> Promise<Vec<T>>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T>>,
    {
        crate::Group::<T>::new(Promise::new(), items).promise()
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.shared.scheduler
    }

    pub fn settlement(&self) -> Settlement<T> {
        self.shared.state.lock().settlement.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.shared.state.lock().settlement, Settlement::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.shared.state.lock().settlement, Settlement::Rejected(_))
    }

    pub fn value(&self) -> Option<T> {
        match &self.shared.state.lock().settlement {
            Settlement::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<Reason> {
        match &self.shared.state.lock().settlement {
            Settlement::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// True if both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Chains both handlers onto this promise.
    ///
    /// The returned promise settles with whatever the handler that runs
    /// returns. `Ok` fulfills it (adopting a returned promise), `Err` rejects
    /// it. A rejection handler that returns `Ok` recovers the chain.
    pub fn then<U, F, R>(&self, on_fulfill: F, on_reject: R) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<U>, Reason> + Send + 'static,
        R: FnOnce(Reason) -> Result<Resolution<U>, Reason> + Send + 'static,
    {
        self.chain(OnFulfill::Handler(Box::new(on_fulfill)), Some(Box::new(on_reject)))
    }

    /// [`then`](Self::then) with optional handlers. A missing handler passes
    /// the outcome through unchanged.
    pub fn then_with<U>(
        &self,
        on_fulfill: Option<FulfillHandler<T, U>>,
        on_reject: Option<RejectHandler<U>>,
    ) -> Promise<U>
    where
        U: Clone + Send + 'static,
        T: Into<U>,
    {
        let on_fulfill = match on_fulfill {
            Some(handler) => OnFulfill::Handler(handler),
            None => OnFulfill::Forward(<T as Into<U>>::into),
        };
        self.chain(on_fulfill, on_reject)
    }

    /// Chains a fulfillment handler. Rejections pass through.
    pub fn and_then<U, F>(&self, on_fulfill: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<U>, Reason> + Send + 'static,
    {
        self.chain(OnFulfill::Handler(Box::new(on_fulfill)), None)
    }

    /// Chains an infallible transformation of the value. Rejections pass through.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(Resolution::Value(f(value))))
    }

    /// Chains a rejection handler. Values pass through.
    #[doc(alias = "catch")]
    pub fn rescue<F>(&self, on_reject: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> Result<Resolution<T>, Reason> + Send + 'static,
    {
        self.chain(OnFulfill::Forward(std::convert::identity), Some(Box::new(on_reject)))
    }

    fn chain<U>(&self, on_fulfill: OnFulfill<T, U>, on_reject: Option<RejectHandler<U>>) -> Promise<U>
    where
        U: Clone + Send + 'static,
    {
        let next = Promise::with_scheduler(Arc::clone(&self.shared.scheduler));
        self.add_reaction(Box::new(Callback::new(on_fulfill, on_reject, next.clone())));
        next
    }

    /// Fulfills the promise, or makes it adopt the outcome of a promise or thenable.
    ///
    /// Does nothing if the promise has already settled.
    pub fn fulfill(&self, value: impl Into<Resolution<T>>) -> &Self {
        if !self.is_pending() {
            return self;
        }
        match value.into() {
            Resolution::Value(value) => self.settle(Ok(value)),
            Resolution::Promise(inner) => {
                if inner.leads_to(self) {
                    tracing::trace!("promise resolved with itself");
                    self.settle(Err(Reason::from(Error::Cycle)));
                } else {
                    self.adopt(&inner, inner.upstream());
                }
            }
            Resolution::Thenable(inner) => self.adopt(&*inner, Upstream::new(&inner)),
        }
        self
    }

    /// Rejects the promise. Does nothing if it has already settled.
    pub fn reject(&self, reason: impl Into<Reason>) -> &Self {
        if self.is_pending() {
            self.settle(Err(reason.into()));
        }
        self
    }

    /// Returns the value, or the rejection as an error.
    ///
    /// A pending promise is waited on first. If it is still pending after
    /// that, nothing is left that could settle it and [`Error::Broken`] is
    /// returned.
    pub fn sync(&self) -> Result<T, Error> {
        if self.is_pending() {
            self.wait();
        }
        match self.settlement() {
            Settlement::Fulfilled(value) => Ok(value),
            Settlement::Rejected(reason) => Err(Error::Rejected(reason)),
            Settlement::Pending => {
                tracing::debug!("promise still pending after wait");
                Err(Error::Broken)
            }
        }
    }

    /// Drives the scheduler and whatever this promise is waiting on.
    pub fn wait(&self) {
        self.shared.wait()
    }

    pub(crate) fn upstream(&self) -> Upstream {
        Upstream::new(&self.shared)
    }

    fn adopt(&self, inner: &dyn Thenable<T>, upstream: Upstream) {
        match inner.outcome() {
            Some(outcome) => self.settle(outcome),
            None => {
                tracing::trace!(?upstream, "adopting pending thenable");
                self.follow_upstream(upstream);
                inner.on_settle(Box::new(self.clone()));
            }
        }
    }

    // True if `target` is this promise or anything on its waiting_on chain.
    fn leads_to(&self, target: &Promise<T>) -> bool {
        let target = target.upstream();
        let mut next = Some(self.upstream());
        while let Some(upstream) = next {
            if upstream.is(&target) {
                return true;
            }
            next = upstream.waiting_on();
        }
        false
    }

    fn follow_upstream(&self, upstream: Upstream) {
        let mut state = self.shared.state.lock();
        if state.settlement.is_pending() {
            state.waiting_on = Some(upstream);
        }
    }

    fn add_reaction(&self, reaction: Box<dyn Reaction<T>>) {
        if self.is_pending() {
            reaction.follow(self.upstream());
        }
        let outcome = {
            let mut state = self.shared.state.lock();
            match state.settlement.outcome() {
                Some(outcome) => outcome,
                None => {
                    state.reactions.push(reaction);
                    return;
                }
            }
        };
        self.dispatch(reaction, outcome);
    }

    fn settle(&self, outcome: Result<T, Reason>) {
        let (reactions, wakers) = {
            let mut state = self.shared.state.lock();
            if !state.settlement.is_pending() {
                return;
            }
            state.settlement = match &outcome {
                Ok(value) => Settlement::Fulfilled(value.clone()),
                Err(reason) => Settlement::Rejected(reason.clone()),
            };
            state.waiting_on = None;
            state.listeners.clear();
            (
                std::mem::take(&mut state.reactions),
                std::mem::take(&mut state.wakers),
            )
        };
        tracing::trace!(
            fulfilled = outcome.is_ok(),
            reactions = reactions.len(),
            "promise settled"
        );
        for reaction in reactions {
            self.dispatch(reaction, outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
    }

    fn dispatch(&self, reaction: Box<dyn Reaction<T>>, outcome: Result<T, Reason>) {
        self.shared.scheduler.defer(Box::new(move || match outcome {
            Ok(value) => reaction.fulfill(value),
            Err(reason) => reaction.reject(reason),
        }));
    }
}

impl<T: Clone + Send + 'static> Reaction<T> for Promise<T> {
    fn fulfill(self: Box<Self>, value: T) {
        self.settle(Ok(value));
    }

    fn reject(self: Box<Self>, reason: Reason) {
        self.settle(Err(reason));
    }

    fn follow(&self, upstream: Upstream) {
        self.follow_upstream(upstream);
    }
}

impl<T: Clone + Send + 'static> Waitable for Promise<T> {
    fn wait(&self) {
        self.shared.wait();
    }

    fn waiting_on(&self) -> Option<Upstream> {
        self.shared.waiting_on()
    }
}

impl<T: Clone + Send + 'static> Thenable<T> for Promise<T> {
    fn outcome(&self) -> Option<Result<T, Reason>> {
        self.shared.state.lock().settlement.outcome()
    }

    fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    fn on_settle(&self, reaction: Box<dyn Reaction<T>>) {
        self.add_reaction(reaction);
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shared.state.lock().settlement {
            Settlement::Pending => write!(f, "Promise {{ <pending> }}"),
            Settlement::Fulfilled(value) => write!(f, "Promise {{ <fulfilled>: {:?} }}", value),
            Settlement::Rejected(reason) => write!(f, "Promise {{ <rejected>: {} }}", reason),
        }
    }
}
