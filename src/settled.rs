use crate::{Abandoned, Context, Promise};
use parking_lot::Mutex;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll, Waker},
};

/// A future resolving to a promise's outcome. Built by [`Promise::settled`].
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (producer, promise) = Promise::<String>::pending();
/// let waiter = promise.settled();
/// let task = thread::spawn(move || block_on(waiter));
/// producer.fulfill("Hi".into());
/// assert_eq!(task.join().unwrap().unwrap(), "Hi");
/// ```
#[derive(Debug)]
pub struct Settled<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Lives inside the registered callbacks. Dropping it without delivering means
/// the promise was freed while still pending.
struct Delivery<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
}

impl<T, E> Delivery<T, E> {
    fn deliver(&self, outcome: Result<T, E>) {
        let mut slot = self.slot.lock();
        slot.value = Some(outcome);
        if let Ok(waker) = std::mem::replace(&mut slot.waker, Err(WakerState::Tainted)) {
            waker.wake()
        }
    }
}

impl<T, E> Drop for Delivery<T, E> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if let Ok(waker) = std::mem::replace(&mut slot.waker, Err(WakerState::Tainted)) {
            waker.wake()
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Abandoned> + 'static,
{
    /// Waits for settlement without blocking a thread.
    ///
    /// The future does not keep the promise alive: if every handle and
    /// producer is dropped while pending, it resolves with [`Abandoned`].
    pub fn settled(&self) -> Settled<T, E> {
        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let on_fulfill = Arc::new(Delivery { slot: slot.clone() });
        let on_reject = on_fulfill.clone();
        self.then(
            &Context::inline(),
            move |value| on_fulfill.deliver(Ok(value)),
            move |err| on_reject.deliver(Err(err)),
        );
        Settled { slot }
    }
}

impl<T, E> Future for Settled<T, E>
where
    E: From<Abandoned>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => match std::mem::replace(&mut slot.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => {
                    slot.waker = Err(WakerState::Tainted);
                    Poll::Ready(Err(Abandoned.into()))
                }
                _ => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Promise};
    use futures::executor::block_on;
    use std::thread;

    #[test]
    fn test_settled_resolve() {
        let (op, promise) = Promise::<String>::pending();
        let waiter = promise.settled();
        let task1 = thread::spawn(move || block_on(waiter));
        let task2 = thread::spawn(move || op.fulfill(String::from("🍓")));
        task2.join().expect("The task2 thread has panicked");
        let received = task1.join().expect("The task1 thread has panicked");
        assert_eq!(received.unwrap(), "🍓");
    }

    #[test]
    fn test_settled_reject() {
        let (op, promise) = Promise::<String>::pending();
        let waiter = promise.settled();
        op.reject(Error::msg("reject!!"));
        assert_eq!(block_on(waiter).unwrap_err().to_string(), "reject!!");
    }

    #[test]
    fn test_settled_after_settlement() {
        let promise = Promise::<i32>::fulfilled(3);
        assert_eq!(block_on(promise.settled()).unwrap(), 3);
        assert_eq!(block_on(promise.settled()).unwrap(), 3);
    }

    #[test]
    fn test_settled_unresolved_producer_dropped() {
        let (op, promise) = Promise::<String>::pending();
        let waiter = promise.settled();
        drop(promise);
        let task = thread::spawn(move || drop(op));
        task.join().expect("The task thread has panicked");
        assert!(block_on(waiter).unwrap_err().is_abandoned());
    }
}
