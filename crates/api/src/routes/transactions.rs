//! Transaction registration, state submission, and query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{BranchTxId, NodeInfo, TxState, Xid};
use coordinator::{
    BranchTxDetail, CoordinatorError, CoordinatorService, CreateBranchTx, CreateGlobalTx,
    GlobalTxDetail, SagaData, SubmitBranchState, SubmitGlobalState,
};
use serde::{Deserialize, Serialize};
use tx_store::{TxStore, Version};

use crate::reply::{Ack, Reply, ack, fail, from_result};

/// Shared application state accessible from all handlers.
pub struct AppState<S: TxStore> {
    pub coordinator: CoordinatorService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateBranchTxBody {
    #[serde(default)]
    pub node: NodeInfo,
    #[serde(default)]
    pub branch_service_key: String,
    #[serde(default)]
    pub branch_compensation_service_key: String,
}

#[derive(Deserialize)]
pub struct SubmitGlobalStateBody {
    pub old_state: TxState,
    pub old_version: Version,
    pub new_state: TxState,
}

#[derive(Deserialize)]
pub struct SubmitBranchStateBody {
    pub old_state: TxState,
    pub old_version: Version,
    pub new_state: TxState,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub error_reason: String,
    #[serde(default)]
    pub saga_data: Option<Vec<u8>>,
}

#[derive(Deserialize)]
pub struct InitSagaDataBody {
    #[serde(default)]
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub states: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct XidBody {
    pub xid: Xid,
}

#[derive(Serialize)]
pub struct BranchIdBody {
    pub branch_tx_id: BranchTxId,
}

#[derive(Serialize)]
pub struct StateBody {
    pub state: TxState,
}

#[derive(Serialize)]
pub struct XidsBody {
    pub xids: Vec<Xid>,
}

// -- Handlers --

/// POST /transactions — register a new global transaction.
#[tracing::instrument(skip(state, req))]
pub async fn create_global<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateGlobalTx>,
) -> Json<Reply<XidBody>> {
    from_result(state.coordinator.create_global_tx(req).await, |xid| {
        XidBody { xid }
    })
}

/// POST /transactions/:xid/branches — register a branch under a global
/// transaction.
#[tracing::instrument(skip(state, body))]
pub async fn create_branch<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(xid): Path<String>,
    Json(body): Json<CreateBranchTxBody>,
) -> Json<Reply<BranchIdBody>> {
    let req = CreateBranchTx {
        node: body.node,
        xid: Xid::from(xid),
        branch_service_key: body.branch_service_key,
        branch_compensation_service_key: body.branch_compensation_service_key,
    };
    from_result(state.coordinator.create_branch_tx(req).await, |id| {
        BranchIdBody { branch_tx_id: id }
    })
}

/// GET /transactions/:xid — global transaction plus its branches.
#[tracing::instrument(skip(state))]
pub async fn global_detail<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(xid): Path<String>,
) -> Json<Reply<GlobalTxDetail>> {
    from_result(
        state.coordinator.query_global_detail(&Xid::from(xid)).await,
        |detail| detail,
    )
}

/// GET /branches/:branch_id — branch plus the owning global transaction's
/// state.
#[tracing::instrument(skip(state))]
pub async fn branch_detail<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(branch_id): Path<String>,
) -> Json<Reply<BranchTxDetail>> {
    from_result(
        state
            .coordinator
            .query_branch_detail(&BranchTxId::from(branch_id))
            .await,
        |detail| detail,
    )
}

/// POST /transactions/:xid/state — submit a global transaction state change.
#[tracing::instrument(skip(state, body))]
pub async fn submit_global_state<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(xid): Path<String>,
    Json(body): Json<SubmitGlobalStateBody>,
) -> Json<Reply<StateBody>> {
    let req = SubmitGlobalState {
        xid: Xid::from(xid),
        old_state: body.old_state,
        old_version: body.old_version,
        new_state: body.new_state,
    };
    from_result(state.coordinator.submit_global_state(req).await, |s| {
        StateBody { state: s }
    })
}

/// POST /transactions/:xid/branches/:branch_id/state — submit a branch
/// transaction state change.
#[tracing::instrument(skip(state, body))]
pub async fn submit_branch_state<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((xid, branch_id)): Path<(String, String)>,
    Json(body): Json<SubmitBranchStateBody>,
) -> Json<Reply<StateBody>> {
    let req = SubmitBranchState {
        xid: Xid::from(xid),
        branch_tx_id: BranchTxId::from(branch_id),
        old_state: body.old_state,
        old_version: body.old_version,
        new_state: body.new_state,
        job_id: body.job_id,
        error_reason: body.error_reason,
        saga_data: body.saga_data,
    };
    from_result(state.coordinator.submit_branch_state(req).await, |s| {
        StateBody { state: s }
    })
}

/// PUT /transactions/:xid/saga-data — first-writer-wins payload
/// initialization.
#[tracing::instrument(skip(state, body))]
pub async fn init_saga_data<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(xid): Path<String>,
    Json(body): Json<InitSagaDataBody>,
) -> Json<Reply<Ack>> {
    match state
        .coordinator
        .init_saga_data(&Xid::from(xid), &body.data)
        .await
    {
        Ok(()) => ack(),
        Err(e) => fail(&e),
    }
}

/// GET /transactions/:xid/saga-data — current payload, or an empty blob at
/// version 0.
#[tracing::instrument(skip(state))]
pub async fn get_saga_data<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(xid): Path<String>,
) -> Json<Reply<SagaData>> {
    from_result(
        state.coordinator.get_saga_data(&Xid::from(xid)).await,
        |data| data,
    )
}

/// GET /transactions?states=…&limit=… — xids currently in any of the given
/// states, newest first, for recovery/sweep tooling.
#[tracing::instrument(skip(state))]
pub async fn list<S: TxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Json<Reply<XidsBody>> {
    let states = match parse_states(params.states.as_deref()) {
        Ok(states) => states,
        Err(e) => return fail(&e),
    };
    from_result(
        state
            .coordinator
            .list_global_txs_of_states(&states, params.limit.unwrap_or(0))
            .await,
        |xids| XidsBody { xids },
    )
}

fn parse_states(raw: Option<&str>) -> Result<Vec<TxState>, CoordinatorError> {
    raw.unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim()
                .parse::<TxState>()
                .map_err(|e| CoordinatorError::InvalidArgument(e.to_string()))
        })
        .collect()
}
