//! # Sync Delivery Worker
//!
//! Drains the sync_outbox toward the remote gateway.
//!
//! ## Sweep Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  1. Fetch undelivered entries in global seq order               │
//! │                                                                 │
//! │  2. Per entry:                                                  │
//! │     - past the retry cap?      skip it (logged, stays FAILED)   │
//! │     - inside backoff window?   stop the sweep                   │
//! │     - deliver with timeout     upsert / delete                  │
//! │     - success                  mark SYNCED, flag the entity     │
//! │     - failure                  mark FAILED, retry_count + 1,    │
//! │                                stop the sweep                   │
//! │                                                                 │
//! │  3. Prune SYNCED entries past the retention window              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stopping the sweep on the first live failure keeps delivery in commit
//! order: a sale is never pushed while the product update before it is
//! still undelivered. Entries past the retry cap are the one exception -
//! they would block the queue forever, so they are skipped and surfaced in
//! the logs instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use meridian_core::{EntityType, SyncOperation, SyncQueueEntry};
use meridian_db::Database;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{ChangeEnvelope, RemoteSyncGateway};

// =============================================================================
// Worker
// =============================================================================

/// Statistics of one sweep, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries acknowledged by the remote this sweep.
    pub delivered: usize,
    /// Entries that failed delivery this sweep.
    pub failed: usize,
    /// Entries skipped for exceeding the retry cap.
    pub skipped: usize,
    /// SYNCED entries pruned past the retention window.
    pub pruned: u64,
}

/// Background delivery loop over the durable outbox.
pub struct SyncWorker {
    db: Database,
    gateway: Arc<dyn RemoteSyncGateway>,
    config: Arc<SyncConfig>,
    shutdown_rx: mpsc::Receiver<()>,
    kick_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running [`SyncWorker`].
#[derive(Clone)]
pub struct SyncWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    kick_tx: mpsc::Sender<()>,
}

impl SyncWorkerHandle {
    /// Requests an immediate sweep (e.g. on connectivity restore).
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.kick_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Kick channel closed".into()))
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl SyncWorker {
    /// Creates a worker and its control handle.
    pub fn new(
        db: Database,
        gateway: Arc<dyn RemoteSyncGateway>,
        config: Arc<SyncConfig>,
    ) -> (Self, SyncWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (kick_tx, kick_rx) = mpsc::channel(8);

        let worker = SyncWorker {
            db,
            gateway,
            config,
            shutdown_rx,
            kick_rx,
        };
        let handle = SyncWorkerHandle {
            shutdown_tx,
            kick_tx,
        };

        (worker, handle)
    }

    /// Runs the delivery loop. Spawn this as a background task.
    pub async fn run(mut self) {
        info!("Sync worker starting");

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(?e, "Outbox sweep failed");
                    }
                }

                Some(()) = self.kick_rx.recv() => {
                    debug!("Manual sweep requested");
                    if let Err(e) = self.sweep().await {
                        error!(?e, "Outbox sweep failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync worker shutting down");
                    break;
                }
            }
        }

        info!("Sync worker stopped");
    }

    /// Processes one batch of undelivered entries, then prunes.
    pub async fn sweep(&self) -> SyncResult<SweepStats> {
        let mut stats = SweepStats::default();

        let entries = self
            .db
            .sync_outbox()
            .pending_batch(self.config.batch_size)
            .await?;

        if !entries.is_empty() {
            debug!(count = entries.len(), "Processing outbox batch");
        }

        let now = Utc::now();

        for entry in &entries {
            if entry.retry_count >= self.config.max_retries {
                warn!(
                    id = %entry.id,
                    entity_type = ?entry.entity_type,
                    entity_id = %entry.entity_id,
                    retry_count = entry.retry_count,
                    "Skipping entry past the retry cap"
                );
                stats.skipped += 1;
                continue;
            }

            // Backoff: an entry that failed recently is not due yet, and
            // everything behind it waits with it.
            if let Some(attempted_at) = entry.attempted_at {
                let delay = chrono::Duration::from_std(self.config.retry_delay(entry.retry_count))
                    .unwrap_or_else(|_| chrono::Duration::zero());
                if now < attempted_at + delay {
                    debug!(id = %entry.id, "Head entry still in backoff, ending sweep");
                    break;
                }
            }

            match self.deliver(entry).await {
                Ok(()) => {
                    self.db.sync_outbox().mark_synced(&entry.id).await?;
                    self.mark_entity_synced(entry).await?;
                    stats.delivered += 1;

                    debug!(
                        id = %entry.id,
                        entity_type = ?entry.entity_type,
                        entity_id = %entry.entity_id,
                        "Delivered outbox entry"
                    );
                }
                Err(e) => {
                    let message = e.to_string();
                    self.db.sync_outbox().mark_failed(&entry.id, &message).await?;
                    stats.failed += 1;

                    warn!(
                        id = %entry.id,
                        entity_id = %entry.entity_id,
                        error = %message,
                        "Delivery failed, ending sweep to preserve order"
                    );
                    break;
                }
            }
        }

        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        stats.pruned = self.db.sync_outbox().prune_synced(cutoff).await?;

        if stats != SweepStats::default() {
            info!(
                delivered = stats.delivered,
                failed = stats.failed,
                skipped = stats.skipped,
                pruned = stats.pruned,
                "Sweep finished"
            );
        }

        Ok(stats)
    }

    /// Delivers one entry through the gateway, bounded by the per-call
    /// timeout.
    async fn deliver(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        let timeout = self.config.request_timeout();

        let result = match entry.operation {
            SyncOperation::Delete => {
                tokio::time::timeout(
                    timeout,
                    self.gateway.delete(entry.entity_type, &entry.entity_id),
                )
                .await
            }
            SyncOperation::Insert | SyncOperation::Update => {
                let envelope = ChangeEnvelope::from_entry(entry);
                tokio::time::timeout(timeout, self.gateway.upsert(&envelope)).await
            }
        };

        result
            .map_err(|_| SyncError::Timeout(self.config.request_timeout_secs))?
            .map_err(|e| SyncError::Gateway(e.to_string()))
    }

    /// Flips the delivered entity's own sync flag.
    async fn mark_entity_synced(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        match entry.entity_type {
            EntityType::Product => self.db.products().mark_synced(&entry.entity_id).await?,
            EntityType::Sale => self.db.sales().mark_synced(&entry.entity_id).await?,
            // Customers and movements carry no local sync flag.
            EntityType::Customer | EntityType::StockMovement => {}
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use meridian_core::{PaymentMethod, Principal, SyncEntryStatus, SyncStatus};
    use meridian_db::catalog::{CatalogManager, NewProduct};
    use meridian_db::checkout::{CheckoutProcessor, CommitSaleRequest};
    use meridian_db::{CartAggregator, DbConfig, EventBus};

    use crate::gateway::{GatewayError, PullResponse};

    /// Records every call; failure modes are switchable per test.
    #[derive(Default)]
    struct MockGateway {
        calls: Mutex<Vec<(EntityType, String)>>,
        fail_all: AtomicBool,
        fail_ids: Mutex<HashSet<String>>,
    }

    impl MockGateway {
        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn calls(&self) -> Vec<(EntityType, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, entity_type: EntityType, entity_id: &str) -> Result<(), GatewayError> {
            let failing = self.fail_all.load(Ordering::SeqCst)
                || self.fail_ids.lock().unwrap().contains(entity_id);
            if failing {
                return Err(GatewayError::Transport("connection refused".into()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((entity_type, entity_id.to_string()));
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl RemoteSyncGateway for MockGateway {
        async fn upsert(&self, change: &ChangeEnvelope) -> Result<(), GatewayError> {
            self.record(change.entity_type, &change.entity_id)
        }

        async fn delete(
            &self,
            entity_type: EntityType,
            entity_id: &str,
        ) -> Result<(), GatewayError> {
            self.record(entity_type, entity_id)
        }

        async fn pull(&self, _since: Option<DateTime<Utc>>) -> Result<PullResponse, GatewayError> {
            Ok(PullResponse {
                products: Vec::new(),
                deleted_product_ids: Vec::new(),
                server_time: Utc::now(),
            })
        }
    }

    struct Harness {
        db: Database,
        catalog: CatalogManager,
        cart: CartAggregator,
        checkout: CheckoutProcessor,
        gateway: Arc<MockGateway>,
        worker: SyncWorker,
        handle: SyncWorkerHandle,
    }

    async fn setup() -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let events = EventBus::new(16);
        let gateway = Arc::new(MockGateway::default());

        // Zero backoff so tests can re-sweep immediately.
        let config = Arc::new(SyncConfig {
            backoff_initial_secs: 0,
            ..SyncConfig::default()
        });

        let (worker, handle) = SyncWorker::new(db.clone(), gateway.clone(), config);

        Harness {
            catalog: CatalogManager::new(db.clone(), events.clone()),
            cart: CartAggregator::new(db.clone()),
            checkout: CheckoutProcessor::new(db.clone(), events),
            db,
            gateway,
            worker,
            handle,
        }
    }

    async fn seed_product(h: &Harness, sku: &str, stock: i64) -> meridian_core::Product {
        h.catalog
            .create_product(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {}", sku),
                description: None,
                sale_price_cents: 1000,
                purchase_price_cents: 500,
                initial_stock: stock,
                min_stock_alert: 0,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_delivers_in_commit_order() {
        let h = setup().await;
        let product = seed_product(&h, "A", 5).await;

        h.cart.add_item("till-1", &product.id, None, 1).await.unwrap();
        let sale = h
            .checkout
            .commit_sale(
                &Principal::new("cashier-1", "till-1"),
                CommitSaleRequest {
                    owner_id: "till-1".to_string(),
                    payment_method: PaymentMethod::Cash,
                    amount_paid_cents: 1000,
                    discount_cents: 0,
                    notes: None,
                    customer_id: None,
                },
            )
            .await
            .unwrap();

        let stats = h.worker.sweep().await.unwrap();
        assert_eq!(stats.delivered, 3); // product insert, product update, sale
        assert_eq!(stats.failed, 0);

        // Product state reached the remote before the sale depending on it.
        let calls = h.gateway.calls();
        assert_eq!(calls[0], (EntityType::Product, product.id.clone()));
        assert_eq!(calls[1], (EntityType::Product, product.id.clone()));
        assert_eq!(calls[2], (EntityType::Sale, sale.id.clone()));

        assert_eq!(h.db.sync_outbox().pending_count().await.unwrap(), 0);

        // The delivered entities were flagged.
        let p = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(p.sync_status, SyncStatus::Synced);
        let s = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(s.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let h = setup().await;
        seed_product(&h, "A", 5).await;

        let first = h.worker.sweep().await.unwrap();
        assert_eq!(first.delivered, 1);

        // Nothing pending: a second sweep must not touch the remote again.
        let second = h.worker.sweep().await.unwrap();
        assert_eq!(second.delivered, 0);
        assert_eq!(h.gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_marks_entry_and_preserves_order() {
        let h = setup().await;
        let a = seed_product(&h, "A", 5).await;
        let b = seed_product(&h, "B", 5).await;

        // First entry fails, second must not be delivered ahead of it.
        h.gateway.fail_ids.lock().unwrap().insert(a.id.clone());

        let stats = h.worker.sweep().await.unwrap();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(h.gateway.call_count(), 0);

        let entries = h.db.sync_outbox().list_all().await.unwrap();
        let entry_a = &entries[0];
        assert_eq!(entry_a.status, SyncEntryStatus::Failed);
        assert_eq!(entry_a.retry_count, 1);
        assert!(entry_a.error_message.as_deref().unwrap().contains("connection refused"));

        // Unblock and re-sweep: both deliver, oldest first.
        h.gateway.fail_ids.lock().unwrap().clear();
        let stats = h.worker.sweep().await.unwrap();
        assert_eq!(stats.delivered, 2);

        let calls = h.gateway.calls();
        assert_eq!(calls[0].1, a.id);
        assert_eq!(calls[1].1, b.id);
    }

    #[tokio::test]
    async fn test_three_failures_leave_local_state_usable() {
        let h = setup().await;
        let product = seed_product(&h, "A", 5).await;

        h.gateway.fail_all.store(true, Ordering::SeqCst);

        for _ in 0..3 {
            h.worker.sweep().await.unwrap();
        }

        let entries = h.db.sync_outbox().list_all().await.unwrap();
        assert_eq!(entries[0].retry_count, 3);
        assert_eq!(entries[0].status, SyncEntryStatus::Failed);

        // Local state is authoritative regardless of delivery: the product
        // is still fully usable.
        h.cart.add_item("till-1", &product.id, None, 2).await.unwrap();
        let sale = h
            .checkout
            .commit_sale(
                &Principal::new("cashier-1", "till-1"),
                CommitSaleRequest {
                    owner_id: "till-1".to_string(),
                    payment_method: PaymentMethod::Card,
                    amount_paid_cents: 2000,
                    discount_cents: 0,
                    notes: None,
                    customer_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(sale.total_cents, 2000);

        let p = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(p.stock, 3);
    }

    #[tokio::test]
    async fn test_entries_past_retry_cap_are_skipped_not_delivered() {
        let h = setup().await;
        seed_product(&h, "A", 5).await;

        let config = Arc::new(SyncConfig {
            max_retries: 2,
            backoff_initial_secs: 0,
            ..SyncConfig::default()
        });
        let (worker, _handle) = SyncWorker::new(h.db.clone(), h.gateway.clone(), config);

        h.gateway.fail_all.store(true, Ordering::SeqCst);
        worker.sweep().await.unwrap();
        worker.sweep().await.unwrap();

        // Cap reached: the entry is skipped even though the remote is back.
        h.gateway.fail_all.store(false, Ordering::SeqCst);
        let stats = worker.sweep().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(h.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_synced_entries() {
        let h = setup().await;
        seed_product(&h, "A", 5).await;
        h.worker.sweep().await.unwrap();

        // Entry is synced but fresh: the default retention keeps it.
        let stats = h.worker.sweep().await.unwrap();
        assert_eq!(stats.pruned, 0);

        // With no retention everything synced goes.
        let config = Arc::new(SyncConfig {
            retention_days: 0,
            backoff_initial_secs: 0,
            ..SyncConfig::default()
        });
        let (worker, _handle) = SyncWorker::new(h.db.clone(), h.gateway.clone(), config);
        let stats = worker.sweep().await.unwrap();
        assert_eq!(stats.pruned, 1);
        assert!(h.db.sync_outbox().list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_shuts_down_cleanly() {
        let h = setup().await;
        seed_product(&h, "A", 5).await;

        let handle = h.handle.clone();
        let join = tokio::spawn(h.worker.run());

        handle.sync_now().await.unwrap();

        // Wait for the kicked sweep to reach the gateway before stopping.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.gateway.call_count() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown().await.unwrap();
        join.await.unwrap();

        assert_eq!(h.gateway.call_count(), 1);
        assert_eq!(h.db.sync_outbox().pending_count().await.unwrap(), 0);
    }
}
