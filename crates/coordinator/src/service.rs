//! Request-handling facade over the transition engine.
//!
//! Validates inputs, opens exactly one unit of work per call, commits only
//! on full success, and never lets a partial cascade become visible.

use common::{BranchTxId, TxState, Xid};
use tx_store::{BranchTxRecord, GlobalTxRecord, TxStore};

use crate::engine::TransitionEngine;
use crate::error::{CoordinatorError, ReplyCode, Result};
use crate::request::{
    BranchTxDetail, CreateBranchTx, CreateGlobalTx, GlobalTxDetail, SagaData, SubmitBranchState,
    SubmitGlobalState,
};

/// Advisory TTL applied when the creator supplies none.
pub const DEFAULT_GLOBAL_TX_EXPIRE_SECONDS: i32 = 60;

/// Cap applied to state listings when the caller supplies no limit.
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// The coordinator: a stateless state ledger plus consistency referee.
///
/// All shared state lives in the backing store; safe concurrent use of the
/// same entity by two callers is guaranteed solely by the CAS preconditions
/// the engine enforces. The loser of a race receives
/// [`CoordinatorError::ResourceChanged`] and must re-read and retry.
pub struct CoordinatorService<S: TxStore> {
    store: S,
    engine: TransitionEngine,
}

impl<S: TxStore> CoordinatorService<S> {
    /// Creates a coordinator with the default failure threshold.
    pub fn new(store: S) -> Self {
        Self {
            store,
            engine: TransitionEngine::default(),
        }
    }

    /// Creates a coordinator with a custom transition engine.
    pub fn with_engine(store: S, engine: TransitionEngine) -> Self {
        Self { store, engine }
    }

    /// Registers a new global transaction in `(PROCESSING, 0)`.
    #[tracing::instrument(skip(self, req))]
    pub async fn create_global_tx(&self, req: CreateGlobalTx) -> Result<Xid> {
        let expire_seconds = if req.expire_seconds <= 0 {
            DEFAULT_GLOBAL_TX_EXPIRE_SECONDS
        } else {
            req.expire_seconds
        };
        let record = GlobalTxRecord::create(
            Xid::generate(),
            req.node,
            expire_seconds,
            req.extra,
            req.end_branches,
        );

        let mut session = self.store.begin().await?;
        session.insert_global_tx(&record).await?;
        session.commit().await?;

        metrics::counter!("global_transactions_created_total").increment(1);
        tracing::info!(xid = %record.xid, "global transaction created");
        Ok(record.xid)
    }

    /// Registers a branch under an existing global transaction.
    #[tracing::instrument(skip(self, req))]
    pub async fn create_branch_tx(&self, req: CreateBranchTx) -> Result<BranchTxId> {
        if req.xid.is_empty() {
            return Err(CoordinatorError::InvalidArgument("empty xid".to_string()));
        }
        if req.branch_service_key.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "empty branchServiceKey".to_string(),
            ));
        }

        let mut session = self.store.begin().await?;
        if session.find_global_tx(&req.xid).await?.is_none() {
            return Err(CoordinatorError::GlobalTxNotFound(req.xid));
        }
        let record = BranchTxRecord::create(
            BranchTxId::generate(),
            req.xid,
            req.node,
            req.branch_service_key,
            req.branch_compensation_service_key,
        );
        session.insert_branch_tx(&record).await?;
        session.commit().await?;

        metrics::counter!("branch_transactions_created_total").increment(1);
        tracing::info!(
            xid = %record.xid,
            branch_tx_id = %record.branch_tx_id,
            "branch transaction created"
        );
        Ok(record.branch_tx_id)
    }

    /// Submits a global transaction state change; see
    /// [`TransitionEngine::submit_global_state`] for the transition rules.
    #[tracing::instrument(skip(self, req), fields(xid = %req.xid))]
    pub async fn submit_global_state(&self, req: SubmitGlobalState) -> Result<TxState> {
        let started = std::time::Instant::now();
        let mut session = self.store.begin().await?;
        let state = self
            .engine
            .submit_global_state(session.as_mut(), &req)
            .await
            .inspect_err(|e| observe_conflict(e))?;
        session.commit().await?;

        metrics::counter!("state_submissions_total", "kind" => "global").increment(1);
        metrics::histogram!("submission_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(xid = %req.xid, state = %state, "global transaction state submitted");
        Ok(state)
    }

    /// Submits a branch transaction state change; see
    /// [`TransitionEngine::submit_branch_state`] for the transition rules.
    #[tracing::instrument(skip(self, req), fields(xid = %req.xid, branch_tx_id = %req.branch_tx_id))]
    pub async fn submit_branch_state(&self, req: SubmitBranchState) -> Result<TxState> {
        let started = std::time::Instant::now();
        let mut session = self.store.begin().await?;
        let state = self
            .engine
            .submit_branch_state(session.as_mut(), &req)
            .await
            .inspect_err(|e| observe_conflict(e))?;
        session.commit().await?;

        metrics::counter!("state_submissions_total", "kind" => "branch").increment(1);
        metrics::histogram!("submission_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            xid = %req.xid,
            branch_tx_id = %req.branch_tx_id,
            state = %state,
            "branch transaction state submitted"
        );
        Ok(state)
    }

    /// Returns the global transaction plus the ordered list of its branches.
    #[tracing::instrument(skip(self))]
    pub async fn query_global_detail(&self, xid: &Xid) -> Result<GlobalTxDetail> {
        let mut session = self.store.begin().await?;
        let global = session
            .find_global_tx(xid)
            .await?
            .ok_or_else(|| CoordinatorError::GlobalTxNotFound(xid.clone()))?;
        let branches = session.find_branch_txs_by_xid(xid).await?;

        Ok(GlobalTxDetail {
            xid: global.xid,
            state: global.state,
            version: global.version,
            end_branches: global.end_branches,
            creator: global.creator,
            expire_seconds: global.expire_seconds,
            extra: global.extra,
            branches: branches.into_iter().map(Into::into).collect(),
            created_at: global.created_at,
            updated_at: global.updated_at,
        })
    }

    /// Returns the branch plus the owning global transaction's state.
    #[tracing::instrument(skip(self))]
    pub async fn query_branch_detail(&self, branch_tx_id: &BranchTxId) -> Result<BranchTxDetail> {
        let mut session = self.store.begin().await?;
        let branch = session
            .find_branch_tx(branch_tx_id)
            .await?
            .ok_or_else(|| CoordinatorError::BranchTxNotFound(branch_tx_id.clone()))?;
        let global = session.find_global_tx(&branch.xid).await?.ok_or_else(|| {
            CoordinatorError::InvariantViolated(format!(
                "branch references missing global transaction {}",
                branch.xid
            ))
        })?;

        Ok(BranchTxDetail {
            xid: branch.xid.clone(),
            detail: branch.into(),
            global_tx_state: global.state,
        })
    }

    /// First-writer-wins initialization of the per-transaction payload.
    /// A payload that already exists is left untouched and reported as
    /// success.
    #[tracing::instrument(skip(self, data))]
    pub async fn init_saga_data(&self, xid: &Xid, data: &[u8]) -> Result<()> {
        if xid.is_empty() {
            return Err(CoordinatorError::InvalidArgument("empty xid".to_string()));
        }
        let mut session = self.store.begin().await?;
        let inserted = session.insert_saga_payload_if_absent(xid, data).await?;
        session.commit().await?;
        if inserted {
            tracing::info!(xid = %xid, bytes = data.len(), "saga payload initialized");
        }
        Ok(())
    }

    /// Returns the stored payload, or an empty blob at version 0 when the
    /// transaction never initialized one. Absence is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn get_saga_data(&self, xid: &Xid) -> Result<SagaData> {
        let mut session = self.store.begin().await?;
        let payload = session.find_saga_payload(xid).await?;
        Ok(match payload {
            Some(p) => SagaData {
                data: p.data,
                version: p.version,
            },
            None => SagaData {
                data: Vec::new(),
                version: tx_store::Version::initial(),
            },
        })
    }

    /// Xids of global transactions currently in any of `states`, newest
    /// first. Used by external sweep/retry tooling; `limit` values ≤ 0
    /// fall back to the default (20).
    #[tracing::instrument(skip(self))]
    pub async fn list_global_txs_of_states(
        &self,
        states: &[TxState],
        limit: i64,
    ) -> Result<Vec<Xid>> {
        let limit = if limit <= 0 { DEFAULT_LIST_LIMIT } else { limit };
        let mut session = self.store.begin().await?;
        Ok(session.find_xids_by_states(states, limit).await?)
    }
}

fn observe_conflict(e: &CoordinatorError) {
    if e.reply_code() == ReplyCode::ResourceChanged {
        metrics::counter!("cas_conflicts_total").increment(1);
        tracing::warn!(error = %e, "state submission lost a concurrent race");
    }
}
