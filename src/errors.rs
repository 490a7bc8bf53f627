use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The result type of a settled future, as returned by result retrieval.
pub type FutureResult<T, E> = Result<Arc<T>, FutureError<E>>;

/// The errors that can occur while retrieving the result of a future.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FutureError<E: Debug> {
    /// The computation of the future reported an error value.
    #[error("the computation failed: {0:?}")]
    Failed(Arc<E>),
    /// The future didn't settle before the given deadline elapsed.
    ///
    /// This doesn't settle the future, a subsequent retrieval may still
    /// observe the eventual settlement.
    #[error("the future didn't settle within {0:?}")]
    Timeout(Duration),
}
