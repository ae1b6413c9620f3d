use async_trait::async_trait;
use common::{BranchTxId, NodeInfo, TxState, Xid};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::entity::{
    BranchTxRecord, CompensationFailLogRecord, GlobalTxRecord, SagaPayloadRecord, Version,
};
use crate::error::{Result, StoreError};
use crate::store::{Precondition, StoreSession, TxStore};

/// PostgreSQL-backed transaction store.
#[derive(Clone)]
pub struct PostgresTxStore {
    pool: PgPool,
}

impl PostgresTxStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url` with a small default pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self { pool })
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl TxStore for PostgresTxStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresSession { tx }))
    }
}

/// One open database transaction. Dropping the session without committing
/// rolls it back (sqlx transaction semantics).
pub struct PostgresSession {
    tx: Transaction<'static, Postgres>,
}

fn decode_state(code: i32) -> Result<TxState> {
    TxState::from_i32(code).ok_or(StoreError::InvalidStateCode(code))
}

fn row_to_global_tx(row: PgRow) -> Result<GlobalTxRecord> {
    Ok(GlobalTxRecord {
        xid: Xid::from(row.try_get::<String, _>("xid")?),
        state: decode_state(row.try_get("state")?)?,
        version: Version::new(row.try_get("version")?),
        end_branches: row.try_get("end_branches")?,
        creator: NodeInfo {
            group: row.try_get("creator_group")?,
            service: row.try_get("creator_service")?,
            instance_id: row.try_get("creator_instance_id")?,
        },
        expire_seconds: row.try_get("expire_seconds")?,
        extra: row.try_get("extra")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_branch_tx(row: PgRow) -> Result<BranchTxRecord> {
    Ok(BranchTxRecord {
        branch_tx_id: BranchTxId::from(row.try_get::<String, _>("branch_tx_id")?),
        xid: Xid::from(row.try_get::<String, _>("xid")?),
        state: decode_state(row.try_get("state")?)?,
        version: Version::new(row.try_get("version")?),
        compensation_fail_times: row.try_get("compensation_fail_times")?,
        node: NodeInfo {
            group: row.try_get("node_group")?,
            service: row.try_get("node_service")?,
            instance_id: row.try_get("node_instance_id")?,
        },
        branch_service_key: row.try_get("branch_service_key")?,
        branch_compensation_service_key: row.try_get("branch_compensation_service_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_fail_log(row: PgRow) -> Result<CompensationFailLogRecord> {
    Ok(CompensationFailLogRecord {
        xid: Xid::from(row.try_get::<String, _>("xid")?),
        branch_tx_id: BranchTxId::from(row.try_get::<String, _>("branch_tx_id")?),
        job_id: row.try_get("job_id")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Maps a unique-constraint violation on `constraint_name` to
/// [`StoreError::DuplicateKey`], passing other errors through.
fn map_unique_violation(e: sqlx::Error, constraint_name: &str, key: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.constraint() == Some(constraint_name)
    {
        return StoreError::DuplicateKey(key.to_string());
    }
    StoreError::Database(e)
}

const GLOBAL_TX_COLUMNS: &str = "xid, state, version, end_branches, creator_group, \
     creator_service, creator_instance_id, expire_seconds, extra, created_at, updated_at";

const BRANCH_TX_COLUMNS: &str = "branch_tx_id, xid, state, version, compensation_fail_times, \
     node_group, node_service, node_instance_id, branch_service_key, \
     branch_compensation_service_key, created_at, updated_at";

#[async_trait]
impl StoreSession for PostgresSession {
    async fn insert_global_tx(&mut self, record: &GlobalTxRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO global_tx (xid, state, version, end_branches, creator_group,
                creator_service, creator_instance_id, expire_seconds, extra,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.xid.as_str())
        .bind(record.state.as_i32())
        .bind(record.version.as_i64())
        .bind(record.end_branches)
        .bind(&record.creator.group)
        .bind(&record.creator.service)
        .bind(&record.creator.instance_id)
        .bind(record.expire_seconds)
        .bind(&record.extra)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_unique_violation(e, "global_tx_xid_key", record.xid.as_str()))?;
        Ok(())
    }

    async fn insert_branch_tx(&mut self, record: &BranchTxRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO branch_tx (branch_tx_id, xid, state, version,
                compensation_fail_times, node_group, node_service, node_instance_id,
                branch_service_key, branch_compensation_service_key,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.branch_tx_id.as_str())
        .bind(record.xid.as_str())
        .bind(record.state.as_i32())
        .bind(record.version.as_i64())
        .bind(record.compensation_fail_times)
        .bind(&record.node.group)
        .bind(&record.node.service)
        .bind(&record.node.instance_id)
        .bind(&record.branch_service_key)
        .bind(&record.branch_compensation_service_key)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, "branch_tx_branch_tx_id_key", record.branch_tx_id.as_str())
        })?;
        Ok(())
    }

    async fn find_global_tx(&mut self, xid: &Xid) -> Result<Option<GlobalTxRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {GLOBAL_TX_COLUMNS} FROM global_tx WHERE xid = $1 ORDER BY id ASC LIMIT 1"
        ))
        .bind(xid.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_global_tx).transpose()
    }

    async fn find_branch_tx(
        &mut self,
        branch_tx_id: &BranchTxId,
    ) -> Result<Option<BranchTxRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {BRANCH_TX_COLUMNS} FROM branch_tx WHERE branch_tx_id = $1 \
             ORDER BY id ASC LIMIT 1"
        ))
        .bind(branch_tx_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_branch_tx).transpose()
    }

    async fn find_branch_txs_by_xid(&mut self, xid: &Xid) -> Result<Vec<BranchTxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {BRANCH_TX_COLUMNS} FROM branch_tx WHERE xid = $1 ORDER BY id ASC"
        ))
        .bind(xid.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(row_to_branch_tx).collect()
    }

    async fn find_xids_by_states(&mut self, states: &[TxState], limit: i64) -> Result<Vec<Xid>> {
        let codes: Vec<i32> = states.iter().map(|s| s.as_i32()).collect();
        let xids: Vec<String> = sqlx::query_scalar(
            "SELECT xid FROM global_tx WHERE state = ANY($1) ORDER BY id DESC LIMIT $2",
        )
        .bind(&codes)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(xids.into_iter().map(Xid::from).collect())
    }

    async fn update_global_tx_state(
        &mut self,
        xid: &Xid,
        expected: Precondition,
        new_state: TxState,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE global_tx
            SET state = $1, version = version + 1, updated_at = now()
            WHERE xid = $2 AND state = $3 AND version = $4
            "#,
        )
        .bind(new_state.as_i32())
        .bind(xid.as_str())
        .bind(expected.state.as_i32())
        .bind(expected.version.as_i64())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_branch_tx_state(
        &mut self,
        xid: &Xid,
        branch_tx_id: &BranchTxId,
        expected: Precondition,
        new_state: TxState,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE branch_tx
            SET state = $1, version = version + 1, updated_at = now()
            WHERE branch_tx_id = $2 AND xid = $3 AND state = $4 AND version = $5
            "#,
        )
        .bind(new_state.as_i32())
        .bind(branch_tx_id.as_str())
        .bind(xid.as_str())
        .bind(expected.state.as_i32())
        .bind(expected.version.as_i64())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_branch_txs_state_by_xid(
        &mut self,
        xid: &Xid,
        new_state: TxState,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE branch_tx
            SET state = $1, version = version + 1, updated_at = now()
            WHERE xid = $2
            "#,
        )
        .bind(new_state.as_i32())
        .bind(xid.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_branch_txs_from_state(
        &mut self,
        xid: &Xid,
        from: TxState,
        to: TxState,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE branch_tx
            SET state = $1, version = version + 1, updated_at = now()
            WHERE xid = $2 AND state = $3
            "#,
        )
        .bind(to.as_i32())
        .bind(xid.as_str())
        .bind(from.as_i32())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_branch_fail_times(
        &mut self,
        branch_tx_id: &BranchTxId,
        expected_version: Version,
        fail_times: i32,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE branch_tx
            SET compensation_fail_times = $1, version = version + 1, updated_at = now()
            WHERE branch_tx_id = $2 AND version = $3
            "#,
        )
        .bind(fail_times)
        .bind(branch_tx_id.as_str())
        .bind(expected_version.as_i64())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_fail_log_by_job_id(
        &mut self,
        job_id: &str,
    ) -> Result<Option<CompensationFailLogRecord>> {
        let row = sqlx::query(
            "SELECT xid, branch_tx_id, job_id, reason, created_at \
             FROM compensation_fail_log WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_fail_log).transpose()
    }

    async fn insert_fail_log(&mut self, record: &CompensationFailLogRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO compensation_fail_log (xid, branch_tx_id, job_id, reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(record.xid.as_str())
        .bind(record.branch_tx_id.as_str())
        .bind(&record.job_id)
        .bind(&record.reason)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_saga_payload(&mut self, xid: &Xid) -> Result<Option<SagaPayloadRecord>> {
        let row = sqlx::query(
            "SELECT xid, data, version, created_at, updated_at \
             FROM saga_payload WHERE xid = $1",
        )
        .bind(xid.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|row| {
            Ok(SagaPayloadRecord {
                xid: Xid::from(row.try_get::<String, _>("xid")?),
                data: row.try_get("data")?,
                version: Version::new(row.try_get("version")?),
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn insert_saga_payload_if_absent(&mut self, xid: &Xid, data: &[u8]) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO saga_payload (xid, data, version, created_at, updated_at)
            VALUES ($1, $2, 0, now(), now())
            ON CONFLICT (xid) DO NOTHING
            "#,
        )
        .bind(xid.as_str())
        .bind(data)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_saga_payload(
        &mut self,
        xid: &Xid,
        data: &[u8],
        expected_version: Version,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE saga_payload
            SET data = $1, version = version + 1, updated_at = now()
            WHERE xid = $2 AND version = $3
            "#,
        )
        .bind(data)
        .bind(xid.as_str())
        .bind(expected_version.as_i64())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
