use std::time::Duration;

use thiserror::Error;

use crate::compute::ClientError;

/// An error that happens when reading from one of the timed caches.
///
/// The enum is [`Clone`] so that a single failed load can be handed to every caller that was
/// waiting on it. Errors are never persisted in a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The requested item is not in the cache, or does not exist upstream.
    ///
    /// This is a sentinel rather than a failure: callers use it to try an alternate lookup path.
    #[error("vm set store cache miss")]
    NotFound,
    /// The compute API reported that the resource group does not exist.
    #[error("resource group {0:?} not found")]
    ResourceGroupNotFound(String),
    /// The request to the compute API failed.
    ///
    /// The attached string contains the upstream error message.
    #[error("request failed: {0}")]
    Request(String),
    /// The request to the compute API did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// A load was aborted before it produced a result.
    ///
    /// This happens when the loading task panics or is cancelled by the runtime.
    #[error("internal error")]
    InternalError,
}

impl From<ClientError> for CacheError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ResourceGroupNotFound(rg) => Self::ResourceGroupNotFound(rg),
            ClientError::Request(message) => Self::Request(message),
        }
    }
}

impl CacheError {
    /// Whether this is the [`NotFound`](Self::NotFound) cache miss sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// A short tag for this error, used in metrics.
    pub(crate) fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ResourceGroupNotFound(_) => "resource_group_not_found",
            Self::Request(_) => "request",
            Self::Timeout(_) => "timeout",
            Self::InternalError => "internal",
        }
    }
}

/// The result of a cache lookup: either the cached value or the reason why there is none.
pub type CacheEntry<T = ()> = Result<T, CacheError>;
