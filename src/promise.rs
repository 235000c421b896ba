//! The settle-once cell every combinator is built on.
//!
//! A [`Promise`] is a handle to shared state guarded by one lock. Settling and
//! registering both take that lock; dispatching never happens while it is held.
use crate::{Context, Error};
use parking_lot::Mutex;
use std::{fmt, mem, sync::Arc};

/// Where a promise currently stands. Transitions out of `Pending` are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State<T, E = Error> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }
}

type OnFulfill<T> = Box<dyn FnOnce(T) + Send>;
type OnReject<E> = Box<dyn FnOnce(E) + Send>;

struct Callback<T, E> {
    context: Context,
    on_fulfill: Option<OnFulfill<T>>,
    on_reject: Option<OnReject<E>>,
}

impl<T, E> Callback<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn dispatch(self, outcome: State<T, E>) {
        match outcome {
            State::Fulfilled(value) => {
                if let Some(on_fulfill) = self.on_fulfill {
                    tracing::trace!(fulfilled = true, "dispatching callback");
                    self.context.execute(move || on_fulfill(value));
                }
            }
            State::Rejected(err) => {
                if let Some(on_reject) = self.on_reject {
                    tracing::trace!(fulfilled = false, "dispatching callback");
                    self.context.execute(move || on_reject(err));
                }
            }
            State::Pending => {}
        }
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    callbacks: Vec<Callback<T, E>>,
}

/// A single-assignment container for an asynchronous result.
///
/// Cloning the handle shares the same cell. The cell is freed once the last
/// handle and the last [`Producer`] are gone.
///
/// # Examples
///
/// ```
/// use promise_chain::{Context, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let ctx = Context::default();
/// let promise = Promise::<String>::new(|producer| {
///     thread::spawn(move || producer.fulfill("🍓".into()));
/// });
/// let loud = promise.map(&ctx, |fruit| format!("{fruit}!"));
/// assert_eq!(block_on(loud.settled()).unwrap(), "🍓!");
/// ```
pub struct Promise<T, E = Error> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

/// The settling side of a [`Promise`]. Only the first settle call has effect.
pub struct Producer<T, E = Error> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        Producer {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn with_state(state: State<T, E>) -> Self {
        Promise {
            inner: Arc::new(Mutex::new(Inner {
                state,
                callbacks: Vec::new(),
            })),
        }
    }

    /// An unsettled promise together with the producer that settles it.
    pub fn pending() -> (Producer<T, E>, Self) {
        let promise = Self::with_state(State::Pending);
        let producer = Producer {
            inner: promise.inner.clone(),
        };
        (producer, promise)
    }

    /// Runs `work` once, right now, handing it the producer.
    pub fn new(work: impl FnOnce(Producer<T, E>)) -> Self {
        let (producer, promise) = Self::pending();
        work(producer);
        promise
    }

    pub fn fulfilled(value: T) -> Self {
        Self::with_state(State::Fulfilled(value))
    }

    pub fn rejected(err: E) -> Self {
        Self::with_state(State::Rejected(err))
    }

    pub fn resolved_with(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::fulfilled(value),
            Err(err) => Self::rejected(err),
        }
    }

    pub fn state(&self) -> State<T, E> {
        self.inner.lock().state.clone()
    }

    /// The value, if fulfilled.
    pub fn value(&self) -> Option<T> {
        match &self.inner.lock().state {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The error, if rejected.
    pub fn error(&self) -> Option<E> {
        match &self.inner.lock().state {
            State::Rejected(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().state.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.lock().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.lock().state, State::Rejected(_))
    }

    fn register(&self, callback: Callback<T, E>) {
        let mut inner = self.inner.lock();
        if inner.state.is_pending() {
            inner.callbacks.push(callback);
            return;
        }
        let outcome = inner.state.clone();
        drop(inner);
        callback.dispatch(outcome);
    }

    /// Registers both handlers; exactly one of them runs on `ctx` once this
    /// promise settles. Returns a handle to the same promise.
    pub fn then(
        &self,
        ctx: &Context,
        on_fulfill: impl FnOnce(T) + Send + 'static,
        on_reject: impl FnOnce(E) + Send + 'static,
    ) -> Self {
        self.register(Callback {
            context: ctx.clone(),
            on_fulfill: Some(Box::new(on_fulfill)),
            on_reject: Some(Box::new(on_reject)),
        });
        self.clone()
    }

    /// Like [`then`](Self::then) without a rejection handler. A rejection is
    /// still recorded on the promise and seen by other registrants.
    pub fn on_success(&self, ctx: &Context, on_fulfill: impl FnOnce(T) + Send + 'static) -> Self {
        self.register(Callback {
            context: ctx.clone(),
            on_fulfill: Some(Box::new(on_fulfill)),
            on_reject: None,
        });
        self.clone()
    }

    pub fn on_failure(&self, ctx: &Context, on_reject: impl FnOnce(E) + Send + 'static) -> Self {
        self.register(Callback {
            context: ctx.clone(),
            on_fulfill: None,
            on_reject: Some(Box::new(on_reject)),
        });
        self.clone()
    }

    /// A promise of `f` applied to this one's value. Rejections pass through.
    pub fn map<U>(&self, ctx: &Context, f: impl FnOnce(T) -> U + Send + 'static) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
    {
        let (producer, mapped) = Promise::pending();
        let on_reject = producer.clone();
        self.then(
            ctx,
            move |value| {
                producer.fulfill(f(value));
            },
            move |err| {
                on_reject.reject(err);
            },
        );
        mapped
    }

    /// Chains a dependent promise: the result adopts whatever `f` returns.
    pub fn and_then<U>(
        &self,
        ctx: &Context,
        f: impl FnOnce(T) -> Promise<U, E> + Send + 'static,
    ) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
    {
        let (producer, chained) = Promise::pending();
        let on_reject = producer.clone();
        self.then(
            ctx,
            move |value| f(value).pipe(producer),
            move |err| {
                on_reject.reject(err);
            },
        );
        chained
    }

    /// Forwards this promise's eventual outcome into `producer`.
    pub(crate) fn pipe(&self, producer: Producer<T, E>) {
        let on_reject = producer.clone();
        self.then(
            &Context::inline(),
            move |value| {
                producer.fulfill(value);
            },
            move |err| {
                on_reject.reject(err);
            },
        );
    }
}

impl<T, E> Producer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn settle(&self, outcome: State<T, E>) -> bool {
        let callbacks = {
            let mut inner = self.inner.lock();
            if !inner.state.is_pending() {
                tracing::debug!("promise already settled; ignoring");
                return false;
            }
            inner.state = outcome.clone();
            mem::take(&mut inner.callbacks)
        };
        tracing::trace!(
            fulfilled = matches!(outcome, State::Fulfilled(_)),
            callbacks = callbacks.len(),
            "promise settled"
        );
        for callback in callbacks {
            callback.dispatch(outcome.clone());
        }
        true
    }

    /// Fulfills the promise. Returns `false` if it had already settled.
    pub fn fulfill(&self, value: T) -> bool {
        self.settle(State::Fulfilled(value))
    }

    /// Rejects the promise. Returns `false` if it had already settled.
    pub fn reject(&self, err: E) -> bool {
        self.settle(State::Rejected(err))
    }

    pub fn is_settled(&self) -> bool {
        !self.inner.lock().state.is_pending()
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Promise")
            .field("state", &inner.state)
            .field("callbacks", &inner.callbacks.len())
            .finish()
    }
}

impl<T, E> fmt::Debug for Producer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}
