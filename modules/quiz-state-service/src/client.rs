//! HTTP/JSON client for a peer process's sync endpoint.

use quiz_state_types::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_PEER_URL: &str = "http://127.0.0.1:8765";

pub struct SyncClient {
    base_url: String,
    client: reqwest::Client,
}

impl SyncClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            log::warn!("[SYNC] Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        });
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn default_local() -> Self {
        Self::new(DEFAULT_PEER_URL, Duration::from_secs(5))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<ControlResponse, String> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Sync endpoint request failed: {}", e))?;
        resp.json()
            .await
            .map_err(|e| format!("Failed to parse sync endpoint response: {}", e))
    }

    /// Ask the peer to re-read its catalog and reconcile its records.
    pub async fn reload_config(&self) -> Result<ControlResponse, String> {
        self.post_empty("/reload-config").await
    }

    pub async fn send_event(&self, event_type: &str) -> Result<ControlResponse, String> {
        let req = WebhookRequest {
            event_type: event_type.to_string(),
        };
        self.post("/webhook", &req).await
    }

    pub async fn status(&self) -> Result<ServiceStatus, String> {
        let resp: RpcResponse<ServiceStatus> = self.get("/rpc/status").await?;
        resp.data.ok_or_else(|| resp.error.unwrap_or_else(|| "Unknown error".to_string()))
    }

    pub async fn stats(&self) -> Result<StateStats, String> {
        let resp: RpcResponse<StateStats> = self.get("/rpc/stats").await?;
        resp.data.ok_or_else(|| resp.error.unwrap_or_else(|| "Unknown error".to_string()))
    }

    pub async fn participants(&self) -> Result<Vec<ParticipantSummary>, String> {
        let resp: RpcResponse<Vec<ParticipantSummary>> = self.get("/rpc/participants").await?;
        resp.data.ok_or_else(|| resp.error.unwrap_or_else(|| "Unknown error".to_string()))
    }

    /// Remove every participant on the peer.
    pub async fn clear_all(&self) -> Result<(), String> {
        let resp: RpcResponse<bool> = self.post("/rpc/clear", &serde_json::json!({})).await?;
        if resp.success {
            Ok(())
        } else {
            Err(resp.error.unwrap_or_else(|| "Unknown error".to_string()))
        }
    }

    /// Best effort: log the outcome and report whether the peer accepted it.
    /// The peer's file watcher still catches the change if this fails.
    pub async fn notify_reload(&self) -> bool {
        Self::report("reload-config", self.reload_config().await)
    }

    pub async fn notify_event(&self, event_type: &str) -> bool {
        Self::report(event_type, self.send_event(event_type).await)
    }

    fn report(what: &str, result: Result<ControlResponse, String>) -> bool {
        match result {
            Ok(resp) if resp.is_success() => {
                log::info!("[SYNC] Peer acknowledged {}: {}", what, resp.message);
                true
            }
            Ok(resp) => {
                log::warn!("[SYNC] Peer rejected {}: {}", what, resp.message);
                false
            }
            Err(e) => {
                log::warn!("[SYNC] Could not notify peer of {}: {}", what, e);
                false
            }
        }
    }

    // =====================================================
    // Internal helpers
    // =====================================================

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Sync endpoint request failed: {}", e))?;
        resp.json::<T>()
            .await
            .map_err(|e| format!("Failed to parse sync endpoint response: {}", e))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Sync endpoint request failed: {}", e))?;
        resp.json::<T>()
            .await
            .map_err(|e| format!("Failed to parse sync endpoint response: {}", e))
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| format!("Sync endpoint request failed: {}", e))?;
        resp.json::<T>()
            .await
            .map_err(|e| format!("Failed to parse sync endpoint response: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let client = SyncClient::new("http://127.0.0.1:9000/", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://127.0.0.1:9000");
        assert_eq!(SyncClient::default_local().base_url(), DEFAULT_PEER_URL);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_not_fatal() {
        // Grab a free port, then release it so nothing is listening there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = SyncClient::new(&format!("http://127.0.0.1:{}", port), Duration::from_millis(500));
        assert!(client.health().await.is_err());
        assert!(!client.notify_reload().await);
        assert!(!client.notify_event("stands_updated").await);
    }
}
