use chrono::{DateTime, Utc};
use common::{BranchTxId, NodeInfo, TxState, Xid};
use serde::{Deserialize, Serialize};

/// Modification counter for a stored row, used as the optimistic
/// concurrency token.
///
/// Rows are created at version 0 and every accepted mutation increments
/// the version by exactly 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a freshly created row.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A global (saga-level) transaction row.
///
/// Never physically deleted: terminal-state rows remain as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTxRecord {
    pub xid: Xid,
    pub state: TxState,
    pub version: Version,
    /// True once the creator has declared that no further branches will be
    /// registered; gates the "last branch commits => global commits" cascade.
    pub end_branches: bool,
    pub creator: NodeInfo,
    /// Advisory TTL hint. Stored, not enforced; any reaper is external.
    pub expire_seconds: i32,
    pub extra: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GlobalTxRecord {
    /// Builds a fresh row in the initial `(PROCESSING, 0)` state.
    pub fn create(
        xid: Xid,
        creator: NodeInfo,
        expire_seconds: i32,
        extra: Option<String>,
        end_branches: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            xid,
            state: TxState::Processing,
            version: Version::initial(),
            end_branches,
            creator,
            expire_seconds,
            extra,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A branch transaction row. Many branches per global transaction; each
/// carries its own version counter independent of the global row's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTxRecord {
    pub branch_tx_id: BranchTxId,
    pub xid: Xid,
    pub state: TxState,
    pub version: Version,
    /// Distinct failed compensation attempts so far. Monotonic.
    pub compensation_fail_times: i32,
    pub node: NodeInfo,
    /// Opaque key the participant uses to locate its forward handler.
    pub branch_service_key: String,
    /// Opaque key for the participant's compensation handler. May be empty.
    pub branch_compensation_service_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BranchTxRecord {
    /// Builds a fresh row in the initial `(PROCESSING, 0)` state with no
    /// recorded compensation failures.
    pub fn create(
        branch_tx_id: BranchTxId,
        xid: Xid,
        node: NodeInfo,
        branch_service_key: String,
        branch_compensation_service_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            branch_tx_id,
            xid,
            state: TxState::Processing,
            version: Version::initial(),
            compensation_fail_times: 0,
            node,
            branch_service_key,
            branch_compensation_service_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An opaque per-transaction blob participants ask the coordinator to hold,
/// versioned independently of the transaction state. At most one per xid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaPayloadRecord {
    pub xid: Xid,
    pub data: Vec<u8>,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One failed compensation attempt. Append-only; `job_id` is the
/// caller-supplied idempotency key and is unique across the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationFailLogRecord {
    pub xid: Xid,
    pub branch_tx_id: BranchTxId,
    pub job_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl CompensationFailLogRecord {
    pub fn create(xid: Xid, branch_tx_id: BranchTxId, job_id: String, reason: String) -> Self {
        Self {
            xid,
            branch_tx_id,
            job_id,
            reason,
            created_at: Utc::now(),
        }
    }
}
