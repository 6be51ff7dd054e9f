//! Loopback HTTP endpoint other processes use to ask this one to reload.

use crate::routes::{self, AppState};
use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use quiz_state_types::ControlResponse;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    // Read-only views can be fetched cross-origin by the admin page.
    let views = Router::new()
        .route("/health", get(routes::health))
        .route("/rpc/status", get(routes::status))
        .route("/rpc/stats", get(routes::stats))
        .route("/rpc/participants", get(routes::participants))
        .layer(CorsLayer::permissive());

    let actions = Router::new()
        .route("/reload-config", post(routes::reload_config))
        .route("/webhook", post(routes::webhook))
        .route("/rpc/refresh", post(routes::refresh))
        .route("/rpc/clear", post(routes::clear));

    let app = views
        .merge(actions)
        .fallback(routes::not_found)
        .with_state(state);
    with_request_timeout(app, request_timeout)
}

fn with_request_timeout(app: Router, request_timeout: Duration) -> Router {
    app.layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::map_response(timeout_as_json))
}

/// `TimeoutLayer` answers with an empty 408; give it the usual JSON body.
async fn timeout_as_json(response: Response) -> Response {
    if response.status() != StatusCode::REQUEST_TIMEOUT {
        return response;
    }
    log::warn!("[SYNC] Request timed out");
    (
        StatusCode::REQUEST_TIMEOUT,
        Json(ControlResponse::error("Request timed out")),
    )
        .into_response()
}

pub struct ControlServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ControlServer {
    /// Bind on 127.0.0.1:`port` and serve in a background task. Port 0 picks
    /// a free port; see [`ControlServer::local_addr`].
    pub async fn bind(port: u16, state: Arc<AppState>, request_timeout: Duration) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let app = router(state, request_timeout);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                log::error!("[SYNC] Sync server error: {}", e);
            }
        });

        log::info!("[SYNC] Sync server listening on http://{}", addr);
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections, let in-flight requests finish, and wait
    /// for the serve task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            log::error!("[SYNC] Sync server task failed: {}", e);
        }
        log::info!("[SYNC] Sync server stopped");
    }
}
