//! Shared quiz progress state for cooperating processes.
//!
//! Each process keeps its own [`StateManager`] over one JSON state file. Writes
//! are atomic renames; sibling writes are picked up by a file watcher and,
//! when a peer wants it sooner, by a loopback sync endpoint ([`ControlServer`]
//! on the receiving side, [`SyncClient`] on the sending side).

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod migrate;
pub mod reconcile;
pub mod routes;
pub mod server;
pub mod stats;
pub mod store;
pub mod watcher;

pub use catalog::Catalog;
pub use client::SyncClient;
pub use config::Config;
pub use error::StateError;
pub use manager::{StateManager, SubscriptionId};
pub use routes::AppState;
pub use server::ControlServer;
