//! Request and reply payloads for the coordinator RPC surface.

use chrono::{DateTime, Utc};
use common::{BranchTxId, NodeInfo, TxState, Xid};
use serde::{Deserialize, Serialize};
use tx_store::{BranchTxRecord, Version};

/// Registers a new global transaction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGlobalTx {
    /// Identity of the initiating participant.
    #[serde(default)]
    pub node: NodeInfo,
    /// Advisory TTL hint; values ≤ 0 fall back to the default (60s).
    #[serde(default)]
    pub expire_seconds: i32,
    /// Opaque creator-supplied string, stored verbatim.
    #[serde(default)]
    pub extra: Option<String>,
    /// True when the creator declares up-front that no further branches
    /// will be registered, enabling the last-commit cascade.
    #[serde(default)]
    pub end_branches: bool,
}

/// Registers a branch under an existing global transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBranchTx {
    #[serde(default)]
    pub node: NodeInfo,
    pub xid: Xid,
    pub branch_service_key: String,
    #[serde(default)]
    pub branch_compensation_service_key: String,
}

/// Reports a global transaction state change.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitGlobalState {
    pub xid: Xid,
    pub old_state: TxState,
    pub old_version: Version,
    pub new_state: TxState,
}

/// Reports a branch transaction state change.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBranchState {
    pub xid: Xid,
    pub branch_tx_id: BranchTxId,
    pub old_state: TxState,
    pub old_version: Version,
    pub new_state: TxState,
    /// Idempotency key for one compensation attempt; only meaningful with
    /// `new_state == COMPENSATION_ERROR`.
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub error_reason: String,
    /// Optional payload to durably hold for this transaction, upserted in
    /// the same unit of work as the state change.
    #[serde(default)]
    pub saga_data: Option<Vec<u8>>,
}

/// A global transaction with the full ordered list of its branches.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalTxDetail {
    pub xid: Xid,
    pub state: TxState,
    pub version: Version,
    pub end_branches: bool,
    pub creator: NodeInfo,
    pub expire_seconds: i32,
    pub extra: Option<String>,
    pub branches: Vec<BranchSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One branch as reported inside a detail reply.
#[derive(Debug, Clone, Serialize)]
pub struct BranchSummary {
    pub branch_tx_id: BranchTxId,
    pub state: TxState,
    pub version: Version,
    pub compensation_fail_times: i32,
    pub node: NodeInfo,
    pub branch_service_key: String,
    pub branch_compensation_service_key: String,
}

impl From<BranchTxRecord> for BranchSummary {
    fn from(record: BranchTxRecord) -> Self {
        Self {
            branch_tx_id: record.branch_tx_id,
            state: record.state,
            version: record.version,
            compensation_fail_times: record.compensation_fail_times,
            node: record.node,
            branch_service_key: record.branch_service_key,
            branch_compensation_service_key: record.branch_compensation_service_key,
        }
    }
}

/// A branch plus its owning global transaction's current state, so the
/// caller can judge overall progress in one query.
#[derive(Debug, Clone, Serialize)]
pub struct BranchTxDetail {
    pub xid: Xid,
    pub detail: BranchSummary,
    pub global_tx_state: TxState,
}

/// The opaque per-transaction blob and its version.
#[derive(Debug, Clone, Serialize)]
pub struct SagaData {
    pub data: Vec<u8>,
    pub version: Version,
}
