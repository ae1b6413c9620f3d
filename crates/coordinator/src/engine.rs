//! The transaction state machine: CAS-guarded transitions and the
//! branch/global cascade rules.
//!
//! Every operation here runs against an already-open [`StoreSession`];
//! the caller owns commit and rollback, so a cascade that fails part-way
//! never becomes visible.

use common::{TxState, Xid};
use tx_store::{
    BranchTxRecord, CompensationFailLogRecord, GlobalTxRecord, Precondition, StoreSession,
};

use crate::error::{CoordinatorError, Result};
use crate::request::{SubmitBranchState, SubmitGlobalState};

/// Distinct failed compensation attempts a branch may accumulate before
/// it is forced to `COMPENSATION_FAIL`.
pub const DEFAULT_COMPENSATION_MAX_FAIL_TIMES: i32 = 3;

/// Validates and applies state transitions for global and branch
/// transactions, including their cascading side effects.
#[derive(Debug, Clone)]
pub struct TransitionEngine {
    compensation_max_fail_times: i32,
}

impl Default for TransitionEngine {
    fn default() -> Self {
        Self {
            compensation_max_fail_times: DEFAULT_COMPENSATION_MAX_FAIL_TIMES,
        }
    }
}

impl TransitionEngine {
    /// Creates an engine with a non-default failure threshold.
    pub fn new(compensation_max_fail_times: i32) -> Self {
        Self {
            compensation_max_fail_times,
        }
    }

    /// Applies a global transaction state submission.
    ///
    /// The submission is accepted only if the caller's asserted
    /// `(old_state, old_version)` matches the stored row. Submitting the
    /// state the row already holds is an idempotent no-op. Returns the
    /// resulting global state.
    pub async fn submit_global_state(
        &self,
        session: &mut dyn StoreSession,
        req: &SubmitGlobalState,
    ) -> Result<TxState> {
        let global = session
            .find_global_tx(&req.xid)
            .await?
            .ok_or_else(|| CoordinatorError::GlobalTxNotFound(req.xid.clone()))?;

        if global.state != req.old_state || global.version != req.old_version {
            return Err(CoordinatorError::ResourceChanged(format!(
                "global transaction {} changed, re-read current state",
                req.xid
            )));
        }
        if global.state == req.new_state {
            // idempotent re-submission, no version bump
            return Ok(global.state);
        }

        let changed = session
            .update_global_tx_state(
                &req.xid,
                Precondition::new(req.old_state, req.old_version),
                req.new_state,
            )
            .await?;
        if changed == 0 {
            return Err(CoordinatorError::ResourceChanged(format!(
                "global transaction {} not changed, version expired",
                req.xid
            )));
        }

        match req.new_state {
            TxState::Committed => {
                // the authoritative "done" signal: every branch follows,
                // whatever state it is in
                session
                    .update_branch_txs_state_by_xid(&req.xid, TxState::Committed)
                    .await?;
            }
            TxState::CompensationDoing if req.old_state == TxState::Processing => {
                session
                    .update_branch_txs_from_state(
                        &req.xid,
                        TxState::Processing,
                        TxState::CompensationDoing,
                    )
                    .await?;
                session
                    .update_branch_txs_from_state(
                        &req.xid,
                        TxState::Committed,
                        TxState::CompensationDoing,
                    )
                    .await?;
            }
            TxState::CompensationFail => {
                // only a transaction whose branches have all failed
                // compensation may be marked failed from the outside
                let branches = session.find_branch_txs_by_xid(&req.xid).await?;
                if branches.iter().any(|b| b.state != TxState::CompensationFail) {
                    return Err(CoordinatorError::ResourceChanged(format!(
                        "not all branches of {} are COMPENSATION_FAIL",
                        req.xid
                    )));
                }
            }
            _ => {}
        }

        Ok(req.new_state)
    }

    /// Applies a branch transaction state submission.
    ///
    /// Same CAS discipline as the global path, with two differences: a
    /// repeated `COMPENSATION_ERROR` is processed rather than treated as a
    /// no-op (each distinct `job_id` is one attempt), and side effects may
    /// cascade upward into the owning global transaction. Returns the
    /// branch's resulting state.
    pub async fn submit_branch_state(
        &self,
        session: &mut dyn StoreSession,
        req: &SubmitBranchState,
    ) -> Result<TxState> {
        let mut branch = session
            .find_branch_tx(&req.branch_tx_id)
            .await?
            .ok_or_else(|| CoordinatorError::BranchTxNotFound(req.branch_tx_id.clone()))?;

        if branch.xid != req.xid {
            return Err(CoordinatorError::ResourceChanged(format!(
                "branch transaction {} does not belong to {}",
                req.branch_tx_id, req.xid
            )));
        }
        if branch.state != req.old_state || branch.version != req.old_version {
            return Err(CoordinatorError::ResourceChanged(format!(
                "branch transaction {} changed, re-read current state",
                req.branch_tx_id
            )));
        }
        if branch.state == req.new_state && req.new_state != TxState::CompensationError {
            return Ok(branch.state);
        }

        let changed = session
            .update_branch_tx_state(
                &req.xid,
                &req.branch_tx_id,
                Precondition::new(req.old_state, req.old_version),
                req.new_state,
            )
            .await?;
        if changed == 0 {
            return Err(CoordinatorError::ResourceChanged(format!(
                "branch transaction {} not changed, version expired",
                req.branch_tx_id
            )));
        }
        branch.state = req.new_state;
        branch.version = branch.version.next();

        if let Some(data) = &req.saga_data {
            self.upsert_saga_payload(session, &req.xid, data).await?;
        }

        match req.new_state {
            TxState::Committed => {
                self.cascade_branch_committed(session, &branch).await?;
            }
            TxState::CompensationError => {
                self.record_compensation_error(session, &mut branch, &req.job_id, &req.error_reason)
                    .await?;
            }
            TxState::CompensationDone => {
                self.cascade_branch_compensation_done(session, &branch)
                    .await?;
            }
            _ => {}
        }

        Ok(branch.state)
    }

    /// When the last branch of an `end_branches` transaction commits, the
    /// global transaction commits too.
    async fn cascade_branch_committed(
        &self,
        session: &mut dyn StoreSession,
        branch: &BranchTxRecord,
    ) -> Result<()> {
        let global = self.find_owning_global(session, &branch.xid).await?;
        if !global.end_branches {
            return Ok(());
        }
        let siblings = session.find_branch_txs_by_xid(&branch.xid).await?;
        let all_committed = siblings
            .iter()
            .filter(|b| b.branch_tx_id != branch.branch_tx_id)
            .all(|b| b.state == TxState::Committed);
        if all_committed {
            // a zero-row result means another caller advanced the global
            // row first; their cascade stands
            session
                .update_global_tx_state(
                    &branch.xid,
                    Precondition::new(global.state, global.version),
                    TxState::Committed,
                )
                .await?;
        }
        Ok(())
    }

    /// Records one failed compensation attempt, idempotently on `job_id`.
    /// Crossing the failure threshold fails the branch and the owning
    /// global transaction directly, without consulting sibling branches
    /// (the caller-initiated global fail path does require all siblings
    /// failed; the two paths are intentionally different).
    async fn record_compensation_error(
        &self,
        session: &mut dyn StoreSession,
        branch: &mut BranchTxRecord,
        job_id: &str,
        reason: &str,
    ) -> Result<()> {
        if session.find_fail_log_by_job_id(job_id).await?.is_some() {
            // duplicate attempt, already counted
            return Ok(());
        }
        let log = CompensationFailLogRecord::create(
            branch.xid.clone(),
            branch.branch_tx_id.clone(),
            job_id.to_string(),
            reason.to_string(),
        );
        if !session.insert_fail_log(&log).await? {
            return Ok(());
        }

        let fail_times = branch.compensation_fail_times + 1;
        let changed = session
            .update_branch_fail_times(&branch.branch_tx_id, branch.version, fail_times)
            .await?;
        if changed == 0 {
            return Ok(());
        }
        branch.compensation_fail_times = fail_times;
        branch.version = branch.version.next();

        if fail_times <= self.compensation_max_fail_times {
            return Ok(());
        }

        let changed = session
            .update_branch_tx_state(
                &branch.xid,
                &branch.branch_tx_id,
                Precondition::new(branch.state, branch.version),
                TxState::CompensationFail,
            )
            .await?;
        if changed == 0 {
            return Ok(());
        }
        branch.state = TxState::CompensationFail;
        branch.version = branch.version.next();

        let global = self.find_owning_global(session, &branch.xid).await?;
        session
            .update_global_tx_state(
                &branch.xid,
                Precondition::new(global.state, global.version),
                TxState::CompensationFail,
            )
            .await?;
        Ok(())
    }

    /// When the last branch finishes compensation, the global transaction
    /// is compensation-done too.
    async fn cascade_branch_compensation_done(
        &self,
        session: &mut dyn StoreSession,
        branch: &BranchTxRecord,
    ) -> Result<()> {
        let siblings = session.find_branch_txs_by_xid(&branch.xid).await?;
        let all_done = siblings
            .iter()
            .filter(|b| b.branch_tx_id != branch.branch_tx_id)
            .all(|b| b.state == TxState::CompensationDone);
        if all_done {
            let global = self.find_owning_global(session, &branch.xid).await?;
            session
                .update_global_tx_state(
                    &branch.xid,
                    Precondition::new(global.state, global.version),
                    TxState::CompensationDone,
                )
                .await?;
        }
        Ok(())
    }

    /// A branch row always references an existing global row; entities are
    /// never deleted, so absence is corruption rather than a race.
    async fn find_owning_global(
        &self,
        session: &mut dyn StoreSession,
        xid: &Xid,
    ) -> Result<GlobalTxRecord> {
        session.find_global_tx(xid).await?.ok_or_else(|| {
            CoordinatorError::InvariantViolated(format!(
                "branch references missing global transaction {xid}"
            ))
        })
    }

    async fn upsert_saga_payload(
        &self,
        session: &mut dyn StoreSession,
        xid: &Xid,
        data: &[u8],
    ) -> Result<()> {
        if session.insert_saga_payload_if_absent(xid, data).await? {
            return Ok(());
        }
        let current = session.find_saga_payload(xid).await?.ok_or_else(|| {
            CoordinatorError::InvariantViolated(format!("saga payload for {xid} disappeared"))
        })?;
        let changed = session
            .update_saga_payload(xid, data, current.version)
            .await?;
        if changed == 0 {
            return Err(CoordinatorError::ResourceChanged(format!(
                "saga payload for {xid} changed, re-read current version"
            )));
        }
        Ok(())
    }
}
