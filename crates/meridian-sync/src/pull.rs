//! # Pull Synchronizer
//!
//! Applies the server's current view onto the local replica.
//!
//! Last-writer-wins: every pulled row replaces the local row wholesale and
//! tombstones soft-delete, with no field-level merge. The network fetch is
//! wrapped in bounded exponential backoff; the local application is one
//! transaction.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use meridian_db::repository::product::ProductRepository;
use meridian_db::{Database, DbError};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteSyncGateway;

/// Statistics of one pull application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Rows replaced or created from the server view.
    pub upserted: usize,
    /// Tombstones applied as local soft-deletes.
    pub tombstoned: usize,
}

/// Fetches and applies the remote view.
pub struct PullSynchronizer {
    db: Database,
    gateway: Arc<dyn RemoteSyncGateway>,
    config: Arc<SyncConfig>,
}

impl PullSynchronizer {
    pub fn new(
        db: Database,
        gateway: Arc<dyn RemoteSyncGateway>,
        config: Arc<SyncConfig>,
    ) -> Self {
        PullSynchronizer {
            db,
            gateway,
            config,
        }
    }

    /// Pulls changes after `since` and applies them, server-wins.
    ///
    /// Returns the server clock to feed back as the next `since`.
    pub async fn pull_and_apply(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<(PullStats, DateTime<Utc>)> {
        // Bounded retry on the fetch; the gateway call itself is opaque.
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_secs(self.config.backoff_initial_secs.max(1)),
            max_interval: Duration::from_secs(self.config.backoff_max_secs),
            max_elapsed_time: Some(Duration::from_secs(self.config.backoff_max_secs)),
            ..ExponentialBackoff::default()
        };

        let response = backoff::future::retry(policy, || async {
            self.gateway.pull(since).await.map_err(|e| {
                debug!(error = %e, "Pull attempt failed");
                backoff::Error::transient(SyncError::Gateway(e.to_string()))
            })
        })
        .await?;

        let mut stats = PullStats::default();

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        for product in &response.products {
            ProductRepository::upsert_remote_tx(&mut tx, product).await?;
            stats.upserted += 1;
        }

        for product_id in &response.deleted_product_ids {
            match ProductRepository::soft_delete_tx(&mut tx, product_id).await {
                Ok(()) => stats.tombstoned += 1,
                // Deleted on the server before this replica ever saw it.
                Err(DbError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            upserted = stats.upserted,
            tombstoned = stats.tombstoned,
            server_time = %response.server_time,
            "Applied remote view"
        );

        Ok((stats, response.server_time))
    }
}

// =============================================================================
// Tests
// =============================================================================
