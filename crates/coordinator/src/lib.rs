//! Saga transaction coordinator: the transaction state machine, its
//! optimistic-concurrency transition rules, and the request facade.
//!
//! Participants register global transactions and branches, then report
//! state changes back. The coordinator is purely a state ledger plus
//! consistency referee: it validates each submission against the caller's
//! asserted `(state, version)`, applies the update, runs the cascade rules
//! between branch and global state, and rejects lost races with a
//! retryable conflict reply. It never calls out to participants.

pub mod engine;
pub mod error;
pub mod request;
pub mod service;

pub use engine::{DEFAULT_COMPENSATION_MAX_FAIL_TIMES, TransitionEngine};
pub use error::{CoordinatorError, ReplyCode, Result};
pub use request::{
    BranchSummary, BranchTxDetail, CreateBranchTx, CreateGlobalTx, GlobalTxDetail, SagaData,
    SubmitBranchState, SubmitGlobalState,
};
pub use service::{
    CoordinatorService, DEFAULT_GLOBAL_TX_EXPIRE_SECONDS, DEFAULT_LIST_LIMIT,
};
