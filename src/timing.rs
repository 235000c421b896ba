//! Timer-driven promises.
use crate::{race, Context, Promise, TimedOut};
use std::time::Duration;

/// Fulfills with `()` on `ctx` once `duration` has elapsed. Never rejects.
pub fn delay<E>(ctx: &Context, duration: Duration) -> Promise<(), E>
where
    E: Clone + Send + 'static,
{
    Promise::new(|producer| {
        ctx.execute_after(duration, move || {
            producer.fulfill(());
        });
    })
}

/// Rejects with [`TimedOut`] once `duration` has elapsed. Never fulfills.
pub fn timeout<T, E>(ctx: &Context, duration: Duration) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<TimedOut> + 'static,
{
    Promise::new(|producer| {
        delay::<E>(ctx, duration).on_success(ctx, move |()| {
            tracing::trace!(?duration, "timeout elapsed");
            producer.reject(TimedOut.into());
        });
    })
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<TimedOut> + 'static,
{
    /// Races this promise against [`timeout`]. The work behind `self` keeps
    /// running if the timeout wins.
    pub fn add_timeout(&self, ctx: &Context, duration: Duration) -> Promise<T, E> {
        race([self.clone(), timeout(ctx, duration)])
    }
}
