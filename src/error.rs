use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// `sync` ran out of ways to make progress and the promise is still pending.
    #[error("broken promise: still pending after waiting")]
    Broken,
    /// The promise settled with a rejection.
    #[error("promise rejected: {0}")]
    Rejected(Reason),
    /// A promise was asked to adopt its own outcome.
    #[error("promise cannot be resolved with itself")]
    Cycle,
    /// A handler panicked while running.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// `reject` without a specific reason.
    #[error("promise rejected without a reason")]
    Unspecified,
}

impl Error {
    /// Unwraps a rejection back into its reason; every other variant becomes a new reason.
    pub fn into_reason(self) -> Reason {
        match self {
            Error::Rejected(reason) => reason,
            other => Reason::from(other),
        }
    }
}

/// The value a promise is rejected with.
///
/// Any `std::error::Error` converts into a `Reason`. The conversion captures a
/// backtrace at that point unless the error already carries one, so every
/// rejection can be traced back to where it was created. Clones share the same
/// underlying error.
#[derive(Clone)]
pub struct Reason {
    error: Arc<anyhow::Error>,
}

impl Reason {
    /// A reason carrying only a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Reason {
            error: Arc::new(anyhow::Error::msg(message)),
        }
    }

    /// Instantiates the error type `E` and uses it as the reason.
    pub fn of<E>() -> Self
    where
        E: std::error::Error + Default + Send + Sync + 'static,
    {
        Reason::from(E::default())
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.is::<E>()
    }

    /// The trace captured when the reason was created.
    pub fn backtrace(&self) -> &Backtrace {
        self.error.backtrace()
    }

    /// True when both reasons are clones of the same rejection.
    pub fn ptr_eq(&self, other: &Reason) -> bool {
        Arc::ptr_eq(&self.error, &other.error)
    }
}

impl<E> From<E> for Reason
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Reason {
            error: Arc::new(anyhow::Error::new(error)),
        }
    }
}

impl Default for Reason {
    fn default() -> Self {
        Reason::from(Error::Unspecified)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.error, f)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reason").field(&self.error.to_string()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Reason};

    #[derive(thiserror::Error, Debug, Default)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_reason_from_error_type() {
        let reason = Reason::of::<DiskFull>();
        assert!(reason.is::<DiskFull>());
        assert_eq!(reason.to_string(), "disk full");
    }

    #[test]
    fn test_default_reason_is_unspecified() {
        let reason = Reason::default();
        assert!(matches!(reason.downcast_ref::<Error>(), Some(Error::Unspecified)));
    }

    #[test]
    fn test_into_reason_unwraps_rejection() {
        let reason = Reason::msg("boom");
        let back = Error::Rejected(reason.clone()).into_reason();
        assert!(back.ptr_eq(&reason));

        let broken = Error::Broken.into_reason();
        assert!(matches!(broken.downcast_ref::<Error>(), Some(Error::Broken)));
    }

    #[test]
    fn test_clones_share_the_error() {
        let reason = Reason::from(DiskFull);
        let copy = reason.clone();
        assert!(copy.ptr_eq(&reason));
        assert!(!Reason::from(DiskFull).ptr_eq(&reason));
    }
}
