use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    core::query::{query, QueryResult, QuerySpec},
    error::LeaderboardResult,
    scheduler::RefresherState,
    storage::SnapshotStore,
};

#[derive(Clone)]
pub struct AppState {
    store: SnapshotStore,
    refresher: watch::Receiver<RefresherState>,
}

impl AppState {
    pub fn new(store: SnapshotStore, refresher: watch::Receiver<RefresherState>) -> Self {
        AppState { store, refresher }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestBatch {
    batch_id: Option<u64>,
    batches: usize,
    refresher: RefresherState,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/leaderboard", post(leaderboard))
        .route("/leaderboard/latest", get(latest))
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn serve(
    bind_address: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> LeaderboardResult<()> {
    let listener = TcpListener::bind(bind_address).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// An empty or `null` body is the default query.
pub fn parse_query_spec(body: &[u8]) -> LeaderboardResult<QuerySpec> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(QuerySpec::default());
    }
    Ok(serde_json::from_slice::<Option<QuerySpec>>(body)?.unwrap_or_default())
}

async fn leaderboard(State(state): State<AppState>, body: Bytes) -> Response {
    let spec = match parse_query_spec(&body) {
        Ok(spec) => spec,
        Err(e) => {
            warn!("Rejected leaderboard query. {e}");
            return (StatusCode::BAD_REQUEST, Json(QueryResult::failed(e.to_string())))
                .into_response();
        }
    };

    match query(&state.store, &spec) {
        Ok(result) => Json(result).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(QueryResult::failed(e.to_string())),
        )
            .into_response(),
    }
}

async fn latest(State(state): State<AppState>) -> Json<LatestBatch> {
    let refresher = *state.refresher.borrow();
    Json(LatestBatch {
        batch_id: state.store.latest(),
        batches: state.store.len(),
        refresher,
    })
}
