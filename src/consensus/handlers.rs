//! Consensus RPC Handlers
//!
//! HTTP endpoints for the inter-node consensus transport, bound on the
//! node's raft address. Bodies are bincode frames; these routes never
//! appear on the public facade.

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;

use super::protocol::{
    AppendEntriesRequest, InstallSnapshotRequest, VoteRequest, ENDPOINT_APPEND,
    ENDPOINT_SNAPSHOT, ENDPOINT_VOTE,
};
use super::raft::RaftNode;

/// Builds the consensus router served on the raft address.
pub fn router(node: Arc<RaftNode>) -> Router {
    Router::new()
        .route(ENDPOINT_VOTE, post(handle_vote))
        .route(ENDPOINT_APPEND, post(handle_append))
        .route(ENDPOINT_SNAPSHOT, post(handle_snapshot))
        .layer(Extension(node))
}

async fn handle_vote(
    Extension(node): Extension<Arc<RaftNode>>,
    body: Bytes,
) -> Result<Vec<u8>, StatusCode> {
    let request: VoteRequest =
        bincode::deserialize(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let response = node.handle_vote(&request);
    bincode::serialize(&response).map_err(|e| {
        tracing::error!("failed to encode vote response: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn handle_append(
    Extension(node): Extension<Arc<RaftNode>>,
    body: Bytes,
) -> Result<Vec<u8>, StatusCode> {
    let request: AppendEntriesRequest =
        bincode::deserialize(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let response = node.handle_append(request);
    bincode::serialize(&response).map_err(|e| {
        tracing::error!("failed to encode append response: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn handle_snapshot(
    Extension(node): Extension<Arc<RaftNode>>,
    body: Bytes,
) -> Result<Vec<u8>, StatusCode> {
    let request: InstallSnapshotRequest =
        bincode::deserialize(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let response = node.handle_install_snapshot(request);
    bincode::serialize(&response).map_err(|e| {
        tracing::error!("failed to encode snapshot response: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
