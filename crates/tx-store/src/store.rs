use async_trait::async_trait;
use common::{BranchTxId, TxState, Xid};

use crate::entity::{
    BranchTxRecord, CompensationFailLogRecord, GlobalTxRecord, SagaPayloadRecord, Version,
};
use crate::error::Result;

/// The `(state, version)` pair a conditional update asserts against the
/// stored row. The update changes zero rows unless both match at the
/// instant of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub state: TxState,
    pub version: Version,
}

impl Precondition {
    pub fn new(state: TxState, version: Version) -> Self {
        Self { state, version }
    }
}

/// Handle to a backing store. Each call into the coordinator opens exactly
/// one [`StoreSession`]; implementations must be shareable across request
/// handlers.
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Opens a new atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreSession>>;
}

/// One atomic unit of work against the store.
///
/// All reads observe the session's own uncommitted writes. Nothing becomes
/// visible to other sessions until [`commit`](Self::commit); dropping a
/// session without committing rolls everything back.
///
/// Conditional updates return the number of rows changed; zero means the
/// precondition did not hold, and it is the caller's job to interpret that
/// as a conflict. No method here blocks waiting for another session.
#[async_trait]
pub trait StoreSession: Send {
    async fn insert_global_tx(&mut self, record: &GlobalTxRecord) -> Result<()>;

    async fn insert_branch_tx(&mut self, record: &BranchTxRecord) -> Result<()>;

    async fn find_global_tx(&mut self, xid: &Xid) -> Result<Option<GlobalTxRecord>>;

    async fn find_branch_tx(&mut self, branch_tx_id: &BranchTxId)
    -> Result<Option<BranchTxRecord>>;

    /// All branches of a global transaction, in creation order.
    async fn find_branch_txs_by_xid(&mut self, xid: &Xid) -> Result<Vec<BranchTxRecord>>;

    /// Xids of global transactions currently in any of `states`, newest
    /// first, capped at `limit`.
    async fn find_xids_by_states(&mut self, states: &[TxState], limit: i64) -> Result<Vec<Xid>>;

    /// CAS update of a global transaction's state; bumps the version on
    /// success. Returns rows changed (0 or 1).
    async fn update_global_tx_state(
        &mut self,
        xid: &Xid,
        expected: Precondition,
        new_state: TxState,
    ) -> Result<u64>;

    /// CAS update of a branch's state; the row must also belong to `xid`.
    async fn update_branch_tx_state(
        &mut self,
        xid: &Xid,
        branch_tx_id: &BranchTxId,
        expected: Precondition,
        new_state: TxState,
    ) -> Result<u64>;

    /// Moves every branch of `xid` to `new_state` regardless of current
    /// state, bumping each row's version. Returns rows changed.
    async fn update_branch_txs_state_by_xid(&mut self, xid: &Xid, new_state: TxState)
    -> Result<u64>;

    /// Moves the branches of `xid` currently in `from` to `to`, bumping
    /// each changed row's version. Returns rows changed.
    async fn update_branch_txs_from_state(
        &mut self,
        xid: &Xid,
        from: TxState,
        to: TxState,
    ) -> Result<u64>;

    /// Version-guarded write of a branch's compensation failure counter.
    async fn update_branch_fail_times(
        &mut self,
        branch_tx_id: &BranchTxId,
        expected_version: Version,
        fail_times: i32,
    ) -> Result<u64>;

    async fn find_fail_log_by_job_id(
        &mut self,
        job_id: &str,
    ) -> Result<Option<CompensationFailLogRecord>>;

    /// Appends a compensation-failure row. Returns false when a row with
    /// the same `job_id` already exists (the duplicate is swallowed by the
    /// store's uniqueness constraint, not reported as an error).
    async fn insert_fail_log(&mut self, record: &CompensationFailLogRecord) -> Result<bool>;

    async fn find_saga_payload(&mut self, xid: &Xid) -> Result<Option<SagaPayloadRecord>>;

    /// First-writer-wins creation of the payload row at version 0.
    /// Returns false when a row for `xid` already exists.
    async fn insert_saga_payload_if_absent(&mut self, xid: &Xid, data: &[u8]) -> Result<bool>;

    /// Version-guarded replacement of the payload blob. Returns rows changed.
    async fn update_saga_payload(
        &mut self,
        xid: &Xid,
        data: &[u8],
        expected_version: Version,
    ) -> Result<u64>;

    /// Makes the session's writes durable and visible.
    async fn commit(self: Box<Self>) -> Result<()>;
}
