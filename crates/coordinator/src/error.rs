//! Coordinator error types and the in-band reply-code taxonomy.

use common::{BranchTxId, Xid};
use thiserror::Error;
use tx_store::StoreError;

/// Reply codes carried in-band on every coordinator reply, so that normal
/// business outcomes (conflict, not-found) stay distinguishable from
/// infrastructure failure without special-casing transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// Success, including accepted idempotent no-ops.
    Ok,
    /// Storage or infrastructure failure, invalid input, or a violated
    /// invariant. Not retryable without investigation.
    ServerError,
    /// A compare-and-swap precondition failed; safe to retry after
    /// re-reading current state.
    ResourceChanged,
    /// The referenced transaction does not exist.
    NotFound,
}

impl ReplyCode {
    /// The wire representation of the code.
    pub fn as_i32(self) -> i32 {
        match self {
            ReplyCode::Ok => 0,
            ReplyCode::ServerError => 2,
            ReplyCode::ResourceChanged => 3,
            ReplyCode::NotFound => 404,
        }
    }
}

/// Errors that can occur during coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The referenced global transaction does not exist.
    #[error("global transaction {0} not found")]
    GlobalTxNotFound(Xid),

    /// The referenced branch transaction does not exist.
    #[error("branch transaction {0} not found")]
    BranchTxNotFound(BranchTxId),

    /// A CAS precondition did not hold at the instant of update, or a
    /// cascade guard observed a conflicting sibling state.
    #[error("resource changed: {0}")]
    ResourceChanged(String),

    /// The request failed validation before touching the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored data contradicts an invariant the coordinator maintains.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CoordinatorError {
    /// Maps the error onto the reply-code taxonomy.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            CoordinatorError::GlobalTxNotFound(_) | CoordinatorError::BranchTxNotFound(_) => {
                ReplyCode::NotFound
            }
            CoordinatorError::ResourceChanged(_) => ReplyCode::ResourceChanged,
            CoordinatorError::InvalidArgument(_)
            | CoordinatorError::InvariantViolated(_)
            | CoordinatorError::Store(_) => ReplyCode::ServerError,
        }
    }
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_code_wire_values() {
        assert_eq!(ReplyCode::Ok.as_i32(), 0);
        assert_eq!(ReplyCode::ServerError.as_i32(), 2);
        assert_eq!(ReplyCode::ResourceChanged.as_i32(), 3);
        assert_eq!(ReplyCode::NotFound.as_i32(), 404);
    }

    #[test]
    fn errors_map_to_reply_codes() {
        assert_eq!(
            CoordinatorError::GlobalTxNotFound(Xid::from("x")).reply_code(),
            ReplyCode::NotFound
        );
        assert_eq!(
            CoordinatorError::BranchTxNotFound(BranchTxId::from("b")).reply_code(),
            ReplyCode::NotFound
        );
        assert_eq!(
            CoordinatorError::ResourceChanged("stale".into()).reply_code(),
            ReplyCode::ResourceChanged
        );
        assert_eq!(
            CoordinatorError::InvalidArgument("empty xid".into()).reply_code(),
            ReplyCode::ServerError
        );
    }
}
