//! # Customer Repository
//!
//! Customers carry aggregate purchase statistics that the checkout
//! processor updates in the commit transaction. Cancellation does not
//! reverse them (observed behavior of the system, kept as-is).

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use meridian_core::{Customer, EntityType, SyncOperation};

use super::outbox::OutboxRepository;

const CUSTOMER_COLUMNS: &str = "id, name, phone, total_purchases_cents, purchase_count, \
     last_purchase_at, created_at, updated_at";

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Gets a customer by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    /// Creates a customer. The outbox entry rides the same transaction.
    pub async fn create(&self, name: &str, phone: Option<&str>) -> DbResult<Customer> {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            phone: phone.map(str::to_string),
            total_purchases_cents: 0,
            purchase_count: 0,
            last_purchase_at: None,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %customer.id, "Creating customer");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO customers ( \
                id, name, phone, total_purchases_cents, purchase_count, \
                last_purchase_at, created_at, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(customer.total_purchases_cents)
        .bind(customer.purchase_count)
        .bind(customer.last_purchase_at)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&mut *tx)
        .await?;

        let payload = serde_json::to_string(&customer)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Customer,
            &customer.id,
            SyncOperation::Insert,
            &payload,
        )
        .await?;

        tx.commit().await?;

        Ok(customer)
    }

    // =========================================================================
    // Transaction-composable operations
    // =========================================================================

    /// Adds a committed sale to a customer's aggregates.
    ///
    /// Returns false when the customer does not exist (the caller decides
    /// whether that fails the commit).
    pub async fn record_purchase_tx(
        conn: &mut SqliteConnection,
        customer_id: &str,
        total_cents: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE customers SET \
                total_purchases_cents = total_purchases_cents + ?2, \
                purchase_count = purchase_count + 1, \
                last_purchase_at = ?3, \
                updated_at = ?3 \
             WHERE id = ?1",
        )
        .bind(customer_id)
        .bind(total_cents)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
