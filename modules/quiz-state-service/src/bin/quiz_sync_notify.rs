//! Tell a running quiz-state-service to reload.
//!
//! Usage: quiz-sync-notify [EVENT]
//!
//! With no argument (or `reload`) it calls `/reload-config`; anything else is
//! sent to `/webhook` as the event type, e.g. `stands_updated` or
//! `state_changed`. Exits non-zero if the peer did not acknowledge.

use quiz_state_service::{Config, SyncClient};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let client = SyncClient::new(&config.peer_url, config.request_timeout);

    let event = std::env::args().nth(1);
    let delivered = match event.as_deref() {
        None | Some("reload") => client.notify_reload().await,
        Some(event_type) => client.notify_event(event_type).await,
    };

    if !delivered {
        std::process::exit(1);
    }
}
