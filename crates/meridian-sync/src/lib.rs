//! # meridian-sync: Offline-First Replication
//!
//! Eventual delivery of local mutations to one authoritative remote, and
//! application of the remote's view back onto the local replica.
//!
//! ## Architecture
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      meridian-sync                                │
//! │                                                                   │
//! │  ┌──────────────┐   ┌───────────────────┐   ┌──────────────────┐  │
//! │  │  SyncWorker  │   │ RemoteSyncGateway │   │ PullSynchronizer │  │
//! │  │ (worker.rs)  │   │   (gateway.rs)    │   │    (pull.rs)     │  │
//! │  │              │   │                   │   │                  │  │
//! │  │ drains the   │──►│ upsert / delete / │◄──│ applies server   │  │
//! │  │ sync_outbox  │   │ pull contract     │   │ view, server-wins│  │
//! │  └──────────────┘   └───────────────────┘   └──────────────────┘  │
//! │                                                                   │
//! │  Local state is authoritative the instant its transaction         │
//! │  commits; everything here happens after the fact and never rolls  │
//! │  back or blocks a local mutation.                                 │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod pull;
pub mod worker;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use gateway::{ChangeEnvelope, GatewayError, PullResponse, RemoteSyncGateway};
pub use pull::{PullStats, PullSynchronizer};
pub use worker::{SweepStats, SyncWorker, SyncWorkerHandle};
