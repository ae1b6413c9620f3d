use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{BranchTxId, TxState, Xid};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::entity::{
    BranchTxRecord, CompensationFailLogRecord, GlobalTxRecord, SagaPayloadRecord, Version,
};
use crate::error::{Result, StoreError};
use crate::store::{Precondition, StoreSession, TxStore};

#[derive(Debug, Clone, Default)]
struct StoreData {
    global_txs: Vec<GlobalTxRecord>,
    branch_txs: Vec<BranchTxRecord>,
    saga_payloads: Vec<SagaPayloadRecord>,
    fail_logs: Vec<CompensationFailLogRecord>,
}

/// In-memory transaction store for tests and local development.
///
/// Provides the same interface as the PostgreSQL implementation. Each
/// session works on a scratch copy of the data that replaces the shared
/// state on commit; a dropped session leaves the shared state untouched,
/// so rollback semantics match the database. Sessions serialize on an
/// internal mutex.
#[derive(Clone, Default)]
pub struct InMemoryTxStore {
    data: Arc<Mutex<StoreData>>,
}

impl InMemoryTxStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all stored rows.
    pub async fn clear(&self) {
        *self.data.lock().await = StoreData::default();
    }
}

#[async_trait]
impl TxStore for InMemoryTxStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        let guard = self.data.clone().lock_owned().await;
        let scratch = guard.clone();
        Ok(Box::new(InMemorySession { guard, scratch }))
    }
}

/// One open unit of work over the in-memory store. Holds the store lock
/// for its whole lifetime.
pub struct InMemorySession {
    guard: OwnedMutexGuard<StoreData>,
    scratch: StoreData,
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn insert_global_tx(&mut self, record: &GlobalTxRecord) -> Result<()> {
        if self.scratch.global_txs.iter().any(|g| g.xid == record.xid) {
            return Err(StoreError::DuplicateKey(record.xid.to_string()));
        }
        self.scratch.global_txs.push(record.clone());
        Ok(())
    }

    async fn insert_branch_tx(&mut self, record: &BranchTxRecord) -> Result<()> {
        if self
            .scratch
            .branch_txs
            .iter()
            .any(|b| b.branch_tx_id == record.branch_tx_id)
        {
            return Err(StoreError::DuplicateKey(record.branch_tx_id.to_string()));
        }
        self.scratch.branch_txs.push(record.clone());
        Ok(())
    }

    async fn find_global_tx(&mut self, xid: &Xid) -> Result<Option<GlobalTxRecord>> {
        Ok(self
            .scratch
            .global_txs
            .iter()
            .find(|g| &g.xid == xid)
            .cloned())
    }

    async fn find_branch_tx(
        &mut self,
        branch_tx_id: &BranchTxId,
    ) -> Result<Option<BranchTxRecord>> {
        Ok(self
            .scratch
            .branch_txs
            .iter()
            .find(|b| &b.branch_tx_id == branch_tx_id)
            .cloned())
    }

    async fn find_branch_txs_by_xid(&mut self, xid: &Xid) -> Result<Vec<BranchTxRecord>> {
        Ok(self
            .scratch
            .branch_txs
            .iter()
            .filter(|b| &b.xid == xid)
            .cloned()
            .collect())
    }

    async fn find_xids_by_states(&mut self, states: &[TxState], limit: i64) -> Result<Vec<Xid>> {
        Ok(self
            .scratch
            .global_txs
            .iter()
            .rev()
            .filter(|g| states.contains(&g.state))
            .take(limit.max(0) as usize)
            .map(|g| g.xid.clone())
            .collect())
    }

    async fn update_global_tx_state(
        &mut self,
        xid: &Xid,
        expected: Precondition,
        new_state: TxState,
    ) -> Result<u64> {
        let row = self.scratch.global_txs.iter_mut().find(|g| {
            &g.xid == xid && g.state == expected.state && g.version == expected.version
        });
        match row {
            Some(g) => {
                g.state = new_state;
                g.version = g.version.next();
                g.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_branch_tx_state(
        &mut self,
        xid: &Xid,
        branch_tx_id: &BranchTxId,
        expected: Precondition,
        new_state: TxState,
    ) -> Result<u64> {
        let row = self.scratch.branch_txs.iter_mut().find(|b| {
            &b.branch_tx_id == branch_tx_id
                && &b.xid == xid
                && b.state == expected.state
                && b.version == expected.version
        });
        match row {
            Some(b) => {
                b.state = new_state;
                b.version = b.version.next();
                b.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_branch_txs_state_by_xid(
        &mut self,
        xid: &Xid,
        new_state: TxState,
    ) -> Result<u64> {
        let mut changed = 0;
        for b in self.scratch.branch_txs.iter_mut().filter(|b| &b.xid == xid) {
            b.state = new_state;
            b.version = b.version.next();
            b.updated_at = Utc::now();
            changed += 1;
        }
        Ok(changed)
    }

    async fn update_branch_txs_from_state(
        &mut self,
        xid: &Xid,
        from: TxState,
        to: TxState,
    ) -> Result<u64> {
        let mut changed = 0;
        for b in self
            .scratch
            .branch_txs
            .iter_mut()
            .filter(|b| &b.xid == xid && b.state == from)
        {
            b.state = to;
            b.version = b.version.next();
            b.updated_at = Utc::now();
            changed += 1;
        }
        Ok(changed)
    }

    async fn update_branch_fail_times(
        &mut self,
        branch_tx_id: &BranchTxId,
        expected_version: Version,
        fail_times: i32,
    ) -> Result<u64> {
        let row = self
            .scratch
            .branch_txs
            .iter_mut()
            .find(|b| &b.branch_tx_id == branch_tx_id && b.version == expected_version);
        match row {
            Some(b) => {
                b.compensation_fail_times = fail_times;
                b.version = b.version.next();
                b.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_fail_log_by_job_id(
        &mut self,
        job_id: &str,
    ) -> Result<Option<CompensationFailLogRecord>> {
        Ok(self
            .scratch
            .fail_logs
            .iter()
            .find(|l| l.job_id == job_id)
            .cloned())
    }

    async fn insert_fail_log(&mut self, record: &CompensationFailLogRecord) -> Result<bool> {
        if self
            .scratch
            .fail_logs
            .iter()
            .any(|l| l.job_id == record.job_id)
        {
            return Ok(false);
        }
        self.scratch.fail_logs.push(record.clone());
        Ok(true)
    }

    async fn find_saga_payload(&mut self, xid: &Xid) -> Result<Option<SagaPayloadRecord>> {
        Ok(self
            .scratch
            .saga_payloads
            .iter()
            .find(|p| &p.xid == xid)
            .cloned())
    }

    async fn insert_saga_payload_if_absent(&mut self, xid: &Xid, data: &[u8]) -> Result<bool> {
        if self.scratch.saga_payloads.iter().any(|p| &p.xid == xid) {
            return Ok(false);
        }
        let now = Utc::now();
        self.scratch.saga_payloads.push(SagaPayloadRecord {
            xid: xid.clone(),
            data: data.to_vec(),
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        });
        Ok(true)
    }

    async fn update_saga_payload(
        &mut self,
        xid: &Xid,
        data: &[u8],
        expected_version: Version,
    ) -> Result<u64> {
        let row = self
            .scratch
            .saga_payloads
            .iter_mut()
            .find(|p| &p.xid == xid && p.version == expected_version);
        match row {
            Some(p) => {
                p.data = data.to_vec();
                p.version = p.version.next();
                p.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemorySession { mut guard, scratch } = *self;
        *guard = scratch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::NodeInfo;

    fn global_record(end_branches: bool) -> GlobalTxRecord {
        GlobalTxRecord::create(
            Xid::generate(),
            NodeInfo::new("g1", "s1", "i1"),
            60,
            None,
            end_branches,
        )
    }

    fn branch_record(xid: &Xid) -> BranchTxRecord {
        BranchTxRecord::create(
            BranchTxId::generate(),
            xid.clone(),
            NodeInfo::new("g1", "s1", "i1"),
            "svc.process".to_string(),
            "svc.cancel".to_string(),
        )
    }

    #[tokio::test]
    async fn insert_and_find_global_tx() {
        let store = InMemoryTxStore::new();
        let record = global_record(false);

        let mut session = store.begin().await.unwrap();
        session.insert_global_tx(&record).await.unwrap();
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        let found = session.find_global_tx(&record.xid).await.unwrap().unwrap();
        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn duplicate_global_xid_rejected() {
        let store = InMemoryTxStore::new();
        let record = global_record(false);

        let mut session = store.begin().await.unwrap();
        session.insert_global_tx(&record).await.unwrap();
        let result = session.insert_global_tx(&record).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn dropped_session_rolls_back() {
        let store = InMemoryTxStore::new();
        let record = global_record(false);

        {
            let mut session = store.begin().await.unwrap();
            session.insert_global_tx(&record).await.unwrap();
            // no commit
        }

        let mut session = store.begin().await.unwrap();
        assert!(session.find_global_tx(&record.xid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_update_matches_state_and_version() {
        let store = InMemoryTxStore::new();
        let record = global_record(false);

        let mut session = store.begin().await.unwrap();
        session.insert_global_tx(&record).await.unwrap();

        let changed = session
            .update_global_tx_state(
                &record.xid,
                Precondition::new(TxState::Processing, Version::initial()),
                TxState::Committed,
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let updated = session.find_global_tx(&record.xid).await.unwrap().unwrap();
        assert_eq!(updated.state, TxState::Committed);
        assert_eq!(updated.version, Version::new(1));
    }

    #[tokio::test]
    async fn cas_update_rejects_stale_version() {
        let store = InMemoryTxStore::new();
        let record = global_record(false);

        let mut session = store.begin().await.unwrap();
        session.insert_global_tx(&record).await.unwrap();

        let changed = session
            .update_global_tx_state(
                &record.xid,
                Precondition::new(TxState::Processing, Version::new(7)),
                TxState::Committed,
            )
            .await
            .unwrap();
        assert_eq!(changed, 0);

        let untouched = session.find_global_tx(&record.xid).await.unwrap().unwrap();
        assert_eq!(untouched.state, TxState::Processing);
        assert_eq!(untouched.version, Version::initial());
    }

    #[tokio::test]
    async fn branch_cas_requires_owning_xid() {
        let store = InMemoryTxStore::new();
        let global = global_record(false);
        let branch = branch_record(&global.xid);

        let mut session = store.begin().await.unwrap();
        session.insert_global_tx(&global).await.unwrap();
        session.insert_branch_tx(&branch).await.unwrap();

        let wrong_xid = Xid::generate();
        let changed = session
            .update_branch_tx_state(
                &wrong_xid,
                &branch.branch_tx_id,
                Precondition::new(TxState::Processing, Version::initial()),
                TxState::Committed,
            )
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn conditional_cascade_only_moves_matching_branches() {
        let store = InMemoryTxStore::new();
        let global = global_record(false);
        let b1 = branch_record(&global.xid);
        let b2 = branch_record(&global.xid);

        let mut session = store.begin().await.unwrap();
        session.insert_global_tx(&global).await.unwrap();
        session.insert_branch_tx(&b1).await.unwrap();
        session.insert_branch_tx(&b2).await.unwrap();
        session
            .update_branch_tx_state(
                &global.xid,
                &b2.branch_tx_id,
                Precondition::new(TxState::Processing, Version::initial()),
                TxState::CompensationDone,
            )
            .await
            .unwrap();

        let changed = session
            .update_branch_txs_from_state(
                &global.xid,
                TxState::Processing,
                TxState::CompensationDoing,
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let branches = session.find_branch_txs_by_xid(&global.xid).await.unwrap();
        assert_eq!(branches[0].state, TxState::CompensationDoing);
        assert_eq!(branches[1].state, TxState::CompensationDone);
    }

    #[tokio::test]
    async fn fail_log_duplicate_job_id_is_noop() {
        let store = InMemoryTxStore::new();
        let global = global_record(false);
        let branch = branch_record(&global.xid);
        let log = CompensationFailLogRecord::create(
            global.xid.clone(),
            branch.branch_tx_id.clone(),
            "job-1".to_string(),
            "timeout".to_string(),
        );

        let mut session = store.begin().await.unwrap();
        assert!(session.insert_fail_log(&log).await.unwrap());
        assert!(!session.insert_fail_log(&log).await.unwrap());

        let found = session.find_fail_log_by_job_id("job-1").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn saga_payload_first_writer_wins() {
        let store = InMemoryTxStore::new();
        let xid = Xid::generate();

        let mut session = store.begin().await.unwrap();
        assert!(
            session
                .insert_saga_payload_if_absent(&xid, b"first")
                .await
                .unwrap()
        );
        assert!(
            !session
                .insert_saga_payload_if_absent(&xid, b"second")
                .await
                .unwrap()
        );

        let payload = session.find_saga_payload(&xid).await.unwrap().unwrap();
        assert_eq!(payload.data, b"first");
        assert_eq!(payload.version, Version::initial());
    }

    #[tokio::test]
    async fn saga_payload_versioned_update() {
        let store = InMemoryTxStore::new();
        let xid = Xid::generate();

        let mut session = store.begin().await.unwrap();
        session
            .insert_saga_payload_if_absent(&xid, b"v0")
            .await
            .unwrap();

        let changed = session
            .update_saga_payload(&xid, b"v1", Version::initial())
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let stale = session
            .update_saga_payload(&xid, b"again", Version::initial())
            .await
            .unwrap();
        assert_eq!(stale, 0);

        let payload = session.find_saga_payload(&xid).await.unwrap().unwrap();
        assert_eq!(payload.data, b"v1");
        assert_eq!(payload.version, Version::new(1));
    }

    #[tokio::test]
    async fn xids_listed_newest_first_with_limit() {
        let store = InMemoryTxStore::new();
        let mut session = store.begin().await.unwrap();

        let mut xids = Vec::new();
        for _ in 0..3 {
            let record = global_record(false);
            xids.push(record.xid.clone());
            session.insert_global_tx(&record).await.unwrap();
        }

        let listed = session
            .find_xids_by_states(&[TxState::Processing], 2)
            .await
            .unwrap();
        assert_eq!(listed, vec![xids[2].clone(), xids[1].clone()]);
    }
}
