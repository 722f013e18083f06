//! # parley-core
//!
//! Connection registry, group membership and message dispatch for the
//! Parley chat relay.
//!
//! - **Registry** - live connections and their bound display names
//! - **GroupTable** - named groups and their members
//! - **Dispatcher** - the single consumer that performs every delivery
//! - **Session** - per-connection read loop feeding the dispatcher
//! - **MessageStore** - write-through persistence of delivered messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐  enqueue   ┌──────────────┐  write  ┌───────────────┐
//! │ Session │──────────▶│  Dispatcher  │───────▶│ FrameSink × N │
//! └─────────┘  (bounded) └──────────────┘         └───────────────┘
//!      │                    │        │
//!      ▼                    ▼        ▼
//! ┌──────────────┐     ┌──────────┐ ┌────────────┐
//! │ MessageStore │     │ Registry │ │ GroupTable │
//! └──────────────┘     └──────────┘ └────────────┘
//! ```

pub mod dispatcher;
pub mod groups;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod store;

pub use dispatcher::{DeliveryReport, Dispatcher};
pub use groups::{GroupStats, GroupTable};
pub use hub::{ActiveUsers, Hub, HubConfig, HubStats};
pub use registry::{Recipient, Registry};
pub use session::{Session, SessionEnd};
pub use store::{MemoryStore, MessageStore, StoreError, StoredMessage};
