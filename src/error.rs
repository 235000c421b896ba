use std::fmt::Display;
use std::sync::Arc;

/// Rejection produced by [`timeout`](crate::timeout) and
/// [`Promise::add_timeout`](crate::Promise::add_timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out")]
pub struct TimedOut;

/// A pending promise was dropped with nobody left to settle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("promise dropped before it settled")]
pub struct Abandoned;

/// `race` was handed no promises. This is caller misuse, never a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("race requires at least one promise")]
pub struct EmptyRace;

/// The default rejection type carried by a [`Promise`](crate::Promise).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Timeout(#[from] TimedOut),
    #[error(transparent)]
    Abandoned(#[from] Abandoned),
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps any application error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(err))
    }

    pub fn msg(message: impl Display) -> Self {
        Error::new(Message(message.to_string()))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, Error::Abandoned(_))
    }
}
