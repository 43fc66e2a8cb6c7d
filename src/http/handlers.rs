//! Facade Handlers
//!
//! HTTP endpoints exposing the Storage API to clients. Reads are always
//! served from local state (stale on followers by design); writes landing
//! on a follower are transparently proxied to the leader's facade and the
//! leader's response is relayed as-is.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Extension, Path};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;

use crate::consensus::types::Peer;
use crate::error::StoreError;
use crate::storage::api::StorageAPI;
use crate::storage::types::{KeyValueAPIObject, TTL_SNAPSHOT_KEY};

use super::protocol::{
    ErrorResponse, JoinRequest, JoinResponse, LeaderResponse, WriteRequest, ENDPOINT_JOIN,
    ENDPOINT_LEADER,
};

/// Outbound client used for proxying writes to the leader.
#[derive(Clone, Default)]
pub struct ForwardClient(pub reqwest::Client);

/// Builds the public facade router.
pub fn router(api: Arc<StorageAPI>) -> Router {
    let max_body_bytes = std::env::var("MAX_BODY_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(4 * 1024 * 1024);

    Router::new()
        .route(
            "/key/:key",
            post(handle_create)
                .put(handle_update)
                .get(handle_get)
                .delete(handle_delete),
        )
        .route(ENDPOINT_LEADER, get(handle_leader))
        .route(ENDPOINT_JOIN, post(handle_join))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(api))
        .layer(Extension(ForwardClient::default()))
}

/// Public POST handler: create a key, refusing live occupants.
async fn handle_create(
    Extension(api): Extension<Arc<StorageAPI>>,
    Extension(forward): Extension<ForwardClient>,
    Path(key): Path<String>,
    Json(req): Json<WriteRequest>,
) -> Response {
    if let Some(rejection) = reject_reserved(&key) {
        return rejection;
    }
    match api.create_key(&key, &req.value, req.ttl).await {
        Ok(envelope) => envelope_response(StatusCode::CREATED, envelope),
        Err(e) if e.is_not_leader() => {
            forward_write(&forward, &api, Method::POST, &key, &req).await
        }
        Err(e) => error_response(&key, &e),
    }
}

/// Public PUT handler: set a key, overwrite permitted.
async fn handle_update(
    Extension(api): Extension<Arc<StorageAPI>>,
    Extension(forward): Extension<ForwardClient>,
    Path(key): Path<String>,
    Json(req): Json<WriteRequest>,
) -> Response {
    if let Some(rejection) = reject_reserved(&key) {
        return rejection;
    }
    match api.update_key(&key, &req.value, req.ttl).await {
        Ok(envelope) => envelope_response(StatusCode::OK, envelope),
        Err(e) if e.is_not_leader() => {
            forward_write(&forward, &api, Method::PUT, &key, &req).await
        }
        Err(e) => error_response(&key, &e),
    }
}

/// Public GET handler. Served from local applied state on any member.
async fn handle_get(
    Extension(api): Extension<Arc<StorageAPI>>,
    Path(key): Path<String>,
) -> Response {
    if let Some(rejection) = reject_reserved(&key) {
        return rejection;
    }
    match api.get_key(&key, false) {
        Ok(envelope) => envelope_response(StatusCode::OK, envelope),
        Err(e) => error_response(&key, &e),
    }
}

/// Public DELETE handler.
async fn handle_delete(
    Extension(api): Extension<Arc<StorageAPI>>,
    Extension(forward): Extension<ForwardClient>,
    Path(key): Path<String>,
) -> Response {
    if let Some(rejection) = reject_reserved(&key) {
        return rejection;
    }
    match api.delete_key(&key).await {
        Ok(envelope) => envelope_response(StatusCode::OK, envelope),
        Err(e) if e.is_not_leader() => forward_delete(&forward, &api, &key).await,
        Err(e) => error_response(&key, &e),
    }
}

/// Leader identity as seen by this node.
async fn handle_leader(
    Extension(api): Extension<Arc<StorageAPI>>,
) -> (StatusCode, Json<LeaderResponse>) {
    let store = api.store();
    (
        StatusCode::OK,
        Json(LeaderResponse {
            is_leader: store.is_leader(),
            leader_is: store.leader_address().unwrap_or_default(),
        }),
    )
}

/// Adds a member to the cluster. Proxied to the leader when this node is
/// a follower.
async fn handle_join(
    Extension(api): Extension<Arc<StorageAPI>>,
    Extension(forward): Extension<ForwardClient>,
    Json(req): Json<JoinRequest>,
) -> Response {
    if req.addr.is_empty() {
        return error_response(
            "join",
            &StoreError::InvalidKey("peer address cannot be empty".to_string()),
        );
    }
    let peer = Peer::new(&req.addr, &req.http_addr);
    match api.store().join(peer).await {
        Ok(()) => (StatusCode::OK, Json(JoinResponse { success: true })).into_response(),
        Err(e) if e.is_not_leader() => forward_join(&forward, &api, &req).await,
        Err(e) => error_response("join", &e),
    }
}

// ---- response shaping ----

fn envelope_response(status: StatusCode, mut envelope: KeyValueAPIObject) -> Response {
    // Client-facing keys are `/`-prefixed; stored keys are not.
    envelope.node.key = format!("/{}", envelope.node.key.trim_start_matches('/'));
    (status, Json(envelope)).into_response()
}

fn error_response(key: &str, err: &StoreError) -> Response {
    let status = match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::KeyExists => StatusCode::CONFLICT,
        StoreError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        StoreError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StoreError::NotLeader { .. } | StoreError::Unavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    let body = ErrorResponse {
        cause: format!("/{}", key.trim_start_matches('/')),
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

fn reject_reserved(key: &str) -> Option<Response> {
    if key == TTL_SNAPSHOT_KEY {
        return Some(error_response(
            key,
            &StoreError::InvalidKey("key is reserved".to_string()),
        ));
    }
    None
}

// ---- leader proxying ----

async fn forward_write(
    forward: &ForwardClient,
    api: &StorageAPI,
    method: Method,
    key: &str,
    req: &WriteRequest,
) -> Response {
    let Some(leader) = forwardable_leader(api, key) else {
        return no_leader_response(key);
    };
    let url = format!("http://{}/key/{}", leader.http_addr, key);

    for attempt in 0..3u32 {
        let request = if method == Method::POST {
            forward.0.post(&url)
        } else {
            forward.0.put(&url)
        };
        match request
            .json(req)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => return relay(response).await,
            Err(e) => {
                tracing::warn!("write forward to {} failed (attempt {}): {}", url, attempt + 1, e);
                backoff(attempt).await;
            }
        }
    }
    no_leader_response(key)
}

async fn forward_delete(forward: &ForwardClient, api: &StorageAPI, key: &str) -> Response {
    let Some(leader) = forwardable_leader(api, key) else {
        return no_leader_response(key);
    };
    let url = format!("http://{}/key/{}", leader.http_addr, key);

    for attempt in 0..3u32 {
        match forward
            .0
            .delete(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => return relay(response).await,
            Err(e) => {
                tracing::warn!("delete forward to {} failed (attempt {}): {}", url, attempt + 1, e);
                backoff(attempt).await;
            }
        }
    }
    no_leader_response(key)
}

async fn forward_join(forward: &ForwardClient, api: &StorageAPI, req: &JoinRequest) -> Response {
    let Some(leader) = forwardable_leader(api, "join") else {
        return no_leader_response("join");
    };
    let url = format!("http://{}{}", leader.http_addr, ENDPOINT_JOIN);

    for attempt in 0..3u32 {
        match forward
            .0
            .post(&url)
            .json(req)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => return relay(response).await,
            Err(e) => {
                tracing::warn!("join forward to {} failed (attempt {}): {}", url, attempt + 1, e);
                backoff(attempt).await;
            }
        }
    }
    no_leader_response("join")
}

/// The leader to proxy to, unless it is this node (then the write already
/// failed for a reason other than routing) or its facade address is
/// unknown.
fn forwardable_leader(api: &StorageAPI, key: &str) -> Option<Peer> {
    let store = api.store();
    let leader = store.leader()?;
    if leader.raft_addr == store.identity().raft_addr || leader.http_addr.is_empty() {
        tracing::debug!("no forwardable leader for /{}", key);
        return None;
    }
    Some(leader)
}

async fn relay(response: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    match response.bytes().await {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()),
        Err(e) => {
            tracing::warn!("failed to read forwarded response: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn no_leader_response(key: &str) -> Response {
    error_response(
        key,
        &StoreError::Unavailable("no reachable leader".to_string()),
    )
}

async fn backoff(attempt: u32) {
    let jitter = rand::random::<u64>() % 50;
    tokio::time::sleep(Duration::from_millis(150 * (attempt as u64 + 1) + jitter)).await;
}
