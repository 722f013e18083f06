//! # Parley Server
//!
//! WebSocket chat relay: clients connect on the WebSocket endpoint, send
//! JSON chat frames, and receive every broadcast, private or group message
//! addressed to them. A small HTTP API exposes the active users and the
//! persisted history.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod storage;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
pub use storage::{open_store, SqliteStore};
