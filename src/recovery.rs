//! Turning rejections into second chances.
use crate::{Context, Producer, Promise};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// On rejection, runs `recovery` on `ctx` and adopts the promise it
    /// returns. `recovery` never runs if this promise fulfills.
    pub fn recover(
        &self,
        ctx: &Context,
        recovery: impl FnOnce(E) -> Promise<T, E> + Send + 'static,
    ) -> Promise<T, E> {
        Promise::new(|producer| {
            let on_fulfill = producer.clone();
            self.then(
                ctx,
                move |value| {
                    on_fulfill.fulfill(value);
                },
                move |err| recovery(err).pipe(producer),
            );
        })
    }

    /// Runs `on_complete` on `ctx` once this promise settles either way.
    /// Returns a handle to this same promise.
    pub fn always(&self, ctx: &Context, on_complete: impl FnOnce() + Send + 'static) -> Self {
        let on_fulfill = Arc::new(Mutex::new(Some(on_complete)));
        let on_reject = on_fulfill.clone();
        self.then(
            ctx,
            move |_| {
                if let Some(on_complete) = on_fulfill.lock().take() {
                    on_complete()
                }
            },
            move |_| {
                if let Some(on_complete) = on_reject.lock().take() {
                    on_complete()
                }
            },
        )
    }
}

struct RetryLoop<T, E, G> {
    ctx: Context,
    delay: Duration,
    remaining: AtomicUsize,
    generate: G,
    producer: Producer<T, E>,
}

impl<T, E, G> RetryLoop<T, E, G>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    G: Fn() -> Promise<T, E> + Send + Sync + 'static,
{
    fn attempt(self: Arc<Self>) {
        let on_fulfill = self.producer.clone();
        let attempt = (self.generate)();
        attempt.then(
            &Context::inline(),
            move |value| {
                on_fulfill.fulfill(value);
            },
            move |err| self.back_off(err),
        );
    }

    fn back_off(self: Arc<Self>, err: E) {
        let decremented =
            self.remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1));
        let Ok(before) = decremented else {
            tracing::debug!("retries exhausted");
            self.producer.reject(err);
            return;
        };
        tracing::debug!(remaining = before - 1, delay = ?self.delay, "attempt failed; retrying");
        let ctx = self.ctx.clone();
        ctx.execute_after(self.delay, move || self.attempt());
    }
}

/// Calls `generate` until one attempt fulfills, waiting `delay` after each
/// rejection. At most `count + 1` attempts are made; the last rejection is
/// propagated. With `count == 0` the result is exactly `generate()`.
///
/// The first attempt starts immediately on the calling thread, later ones on
/// `ctx`. Each retry is scheduled through the timer, so the stack does not
/// grow with `count`.
pub fn retry<T, E, G>(ctx: &Context, count: usize, delay: Duration, generate: G) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    G: Fn() -> Promise<T, E> + Send + Sync + 'static,
{
    if count == 0 {
        return generate();
    }
    Promise::new(|producer| {
        Arc::new(RetryLoop {
            ctx: ctx.clone(),
            delay,
            remaining: AtomicUsize::new(count),
            generate,
            producer,
        })
        .attempt()
    })
}
