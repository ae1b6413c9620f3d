//! HTTP API server with observability for the saga coordinator.
//!
//! Maps the coordinator's RPC surface onto JSON endpoints. Every business
//! reply is HTTP 200 with an in-band `code` (plus `error` on failure);
//! structured logging (tracing) and Prometheus metrics come along.

pub mod config;
pub mod reply;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use coordinator::CoordinatorService;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tx_store::TxStore;

use routes::transactions::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: TxStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/transactions",
            post(routes::transactions::create_global::<S>).get(routes::transactions::list::<S>),
        )
        .route(
            "/transactions/{xid}",
            get(routes::transactions::global_detail::<S>),
        )
        .route(
            "/transactions/{xid}/state",
            post(routes::transactions::submit_global_state::<S>),
        )
        .route(
            "/transactions/{xid}/branches",
            post(routes::transactions::create_branch::<S>),
        )
        .route(
            "/transactions/{xid}/branches/{branch_id}/state",
            post(routes::transactions::submit_branch_state::<S>),
        )
        .route(
            "/transactions/{xid}/saga-data",
            put(routes::transactions::init_saga_data::<S>)
                .get(routes::transactions::get_saga_data::<S>),
        )
        .route(
            "/branches/{branch_id}",
            get(routes::transactions::branch_detail::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over the given store.
pub fn create_default_state<S: TxStore + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        coordinator: CoordinatorService::new(store),
    })
}
