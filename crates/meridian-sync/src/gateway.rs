//! # Remote Sync Gateway
//!
//! The contract consumed from the remote authority. The concrete transport
//! (HTTP, gRPC, WebSocket) is someone else's problem; this crate only sees
//! upsert/delete/pull as opaque async calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use meridian_core::{EntityType, Product, SyncOperation, SyncQueueEntry};

/// Failure of a single gateway call.
///
/// The sync worker treats every variant as retryable: the entry is marked
/// FAILED and picked up by a later sweep, until the retry cap.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote rejected the payload.
    #[error("Remote rejected {entity_id}: {message}")]
    Rejected { entity_id: String, message: String },

    /// The call could not reach the remote.
    #[error("Transport failed: {0}")]
    Transport(String),
}

/// One outbound mutation, as the gateway sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,
    /// The entity serialized as JSON at enqueue time.
    pub payload: String,
}

impl ChangeEnvelope {
    /// Builds the envelope for an outbox entry.
    pub fn from_entry(entry: &SyncQueueEntry) -> Self {
        ChangeEnvelope {
            entity_type: entry.entity_type,
            entity_id: entry.entity_id.clone(),
            operation: entry.operation,
            payload: entry.payload.clone(),
        }
    }
}

/// The server's current view, as returned by `pull`.
///
/// Last-writer-wins: rows replace local state wholesale, tombstones name
/// ids deleted on the server. No field-level merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// Products as the server currently knows them.
    pub products: Vec<Product>,

    /// Ids of products deleted on the server since `since`.
    pub deleted_product_ids: Vec<String>,

    /// Server clock at response time; feed back as the next `since`.
    pub server_time: DateTime<Utc>,
}

/// The remote authority's replication contract.
///
/// Calls must be idempotent on the remote side: at-least-once delivery
/// means an acked-but-unrecorded upsert will be sent again.
#[async_trait]
pub trait RemoteSyncGateway: Send + Sync {
    /// Creates or replaces an entity on the remote.
    async fn upsert(&self, change: &ChangeEnvelope) -> Result<(), GatewayError>;

    /// Deletes an entity on the remote.
    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<(), GatewayError>;

    /// Fetches the server's current view, optionally restricted to changes
    /// after `since`.
    async fn pull(&self, since: Option<DateTime<Utc>>) -> Result<PullResponse, GatewayError>;
}
