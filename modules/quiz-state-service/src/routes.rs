//! Axum route handlers for the sync control plane and the admin RPC API.

use crate::manager::StateManager;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Json;
use quiz_state_types::*;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub manager: Arc<StateManager>,
    pub start_time: Instant,
}

/// What a control request asks this process to re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadAction {
    /// Re-read the stand catalog and reconcile every record against it
    Catalog,
    /// Re-read the state file
    State,
}

impl ReloadAction {
    pub fn for_event(event_type: &str) -> &'static [ReloadAction] {
        match event_type {
            "config_changed" | "stands_updated" => &[ReloadAction::Catalog],
            "state_changed" => &[ReloadAction::State],
            _ => &[],
        }
    }
}

/// Run manager work off the async executor; it does blocking file I/O.
async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, String>
where
    F: FnOnce(&StateManager) -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    let manager = state.manager.clone();
    tokio::task::spawn_blocking(move || f(&*manager))
        .await
        .map_err(|e| format!("Reload task failed: {}", e))?
}

async fn run_actions(state: &Arc<AppState>, actions: &'static [ReloadAction]) -> Result<(), String> {
    if actions.is_empty() {
        return Ok(());
    }
    blocking(state, move |manager| {
        for action in actions {
            match action {
                ReloadAction::Catalog => {
                    manager.reload_catalog().map_err(|e| e.to_string())?;
                }
                ReloadAction::State => {
                    manager.refresh();
                }
            }
        }
        Ok(())
    })
    .await
}

// GET /health
pub async fn health() -> Json<ControlResponse> {
    Json(ControlResponse::ok("Sync server is running"))
}

// POST /reload-config
pub async fn reload_config(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ControlResponse>) {
    match run_actions(&state, &[ReloadAction::Catalog]).await {
        Ok(()) => {
            log::info!("[SYNC] Configuration reload triggered via API");
            (StatusCode::OK, Json(ControlResponse::success("Configuration reloaded")))
        }
        Err(e) => {
            log::error!("[SYNC] Failed to reload config via API: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ControlResponse::error(e)))
        }
    }
}

// POST /webhook
pub async fn webhook(State(state): State<Arc<AppState>>, body: Bytes) -> (StatusCode, Json<ControlResponse>) {
    let req: WebhookRequest = if body.iter().all(u8::is_ascii_whitespace) {
        WebhookRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                log::warn!("[SYNC] Rejected webhook body: {}", e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ControlResponse::error(format!("Invalid webhook body: {}", e))),
                );
            }
        }
    };

    let actions = ReloadAction::for_event(&req.event_type);
    match run_actions(&state, actions).await {
        Ok(()) => {
            log::info!("[SYNC] Webhook processed: {} ({} actions)", req.event_type, actions.len());
            (
                StatusCode::OK,
                Json(ControlResponse::success(format!("Webhook processed: {}", req.event_type))),
            )
        }
        Err(e) => {
            log::error!("[SYNC] Failed to process webhook {}: {}", req.event_type, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ControlResponse::error(e)))
        }
    }
}

pub async fn not_found() -> (StatusCode, Json<ControlResponse>) {
    (StatusCode::NOT_FOUND, Json(ControlResponse::error("Not Found")))
}

// GET /rpc/status
pub async fn status(State(state): State<Arc<AppState>>) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let uptime_secs = state.start_time.elapsed().as_secs();
    let result = blocking(&state, move |manager| {
        Ok(ServiceStatus {
            running: true,
            uptime_secs,
            total_participants: manager.list().len(),
            total_stands: manager.catalog().len(),
            watching: manager.is_watching(),
        })
    })
    .await;
    match result {
        Ok(s) => (StatusCode::OK, Json(RpcResponse::ok(s))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e))),
    }
}

// GET /rpc/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> (StatusCode, Json<RpcResponse<StateStats>>) {
    match blocking(&state, |manager| Ok(manager.stats())).await {
        Ok(s) => (StatusCode::OK, Json(RpcResponse::ok(s))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e))),
    }
}

// GET /rpc/participants
pub async fn participants(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<ParticipantSummary>>>) {
    match blocking(&state, |manager| Ok(manager.summaries())).await {
        Ok(p) => (StatusCode::OK, Json(RpcResponse::ok(p))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e))),
    }
}

// POST /rpc/refresh
pub async fn refresh(State(state): State<Arc<AppState>>) -> (StatusCode, Json<RpcResponse<bool>>) {
    match blocking(&state, |manager| Ok(manager.refresh())).await {
        Ok(changed) => (StatusCode::OK, Json(RpcResponse::ok(changed))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e))),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("application/json"))
}

// POST /rpc/clear
// A JSON content type keeps browsers from sending this as a simple cross-origin request.
pub async fn clear(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    if !is_json(&headers) {
        log::warn!("[SYNC] Refused clear request without a JSON content type");
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(RpcResponse::err("Content-Type must be application/json")),
        );
    }
    let result = blocking(&state, |manager| {
        manager.clear_all();
        Ok(true)
    })
    .await;
    match result {
        Ok(done) => (StatusCode::OK, Json(RpcResponse::ok(done))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "Application/JSON; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(ReloadAction::for_event("config_changed"), &[ReloadAction::Catalog]);
        assert_eq!(ReloadAction::for_event("stands_updated"), &[ReloadAction::Catalog]);
        assert_eq!(ReloadAction::for_event("state_changed"), &[ReloadAction::State]);
        assert!(ReloadAction::for_event("unknown").is_empty());
        assert!(ReloadAction::for_event("").is_empty());
    }
}
