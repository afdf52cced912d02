//! # Store
//!
//! Durable persistence for the accrual engine: the product registry,
//! per-order status, and the order work queue. One trait, one Postgres
//! implementation — callers depend on the trait so the worker pool and
//! HTTP edge can be exercised against a fake in tests.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{OrderStatus, Product};
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Error taxonomy for Store operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No row for the requested order id — the caller should treat this as
    /// `OrderStatus::Invalid`.
    #[error("order not found")]
    OrderNotFound,
    /// Unique-constraint violation on `products.match_text`.
    #[error("product already registered")]
    ProductAlreadyRegistered,
    /// Checking out a connection from the pool failed.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// Any other Postgres error, surfaced verbatim.
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),
}

/// Durable backing for `products`, `orders`, and `order_queue`.
///
/// Every operation is safe under parallel callers; writes serialize at the
/// row granularity of the underlying store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up the current status and accrual for `id`.
    ///
    /// Returns [`RepositoryError::OrderNotFound`] when no row exists — per
    /// that *is* the INVALID state, not an exceptional condition.
    async fn get_order_status(&self, id: &str) -> Result<(OrderStatus, f64), RepositoryError>;

    /// Inserts a new row or overwrites `(status, accrual)` for `id`.
    /// Atomic with respect to concurrent `get_order_status`.
    async fn upsert_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        accrual: f64,
    ) -> Result<(), RepositoryError>;

    /// Returns every product whose `match_text` is a substring of
    /// `description`. Order is unspecified.
    async fn match_products(&self, description: &str) -> Result<Vec<Product>, RepositoryError>;

    /// Registers a new reward rule. Maps a unique-constraint violation on
    /// `match_text` to [`RepositoryError::ProductAlreadyRegistered`].
    async fn register_product(&self, product: &Product) -> Result<(), RepositoryError>;

    /// Atomically enqueues `payload` under `id` and marks the order
    /// REGISTERED within a single transaction; on any failure the whole
    /// operation is rolled back.
    async fn enqueue_order(&self, id: &str, payload: &[u8]) -> Result<(), RepositoryError>;

    /// Removes `id` from the work queue. Idempotent.
    async fn dequeue_order(&self, id: &str) -> Result<(), RepositoryError>;

    /// Enumerates queue contents, used at startup to recover work after a
    /// crash.
    async fn list_pending_orders(&self) -> Result<Vec<(String, Vec<u8>)>, RepositoryError>;
}

/// Postgres-backed [`Store`].
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_order_status(&self, id: &str) -> Result<(OrderStatus, f64), RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT status, accrual FROM orders WHERE id = $1",
                &[&id],
            )
            .await?;

        match row {
            Some(row) => {
                let status_code: i16 = row.get("status");
                let accrual: f64 = row.get("accrual");
                let status = OrderStatus::from_db_code(status_code)
                    .expect("status column holds only values written by upsert_order_status");
                Ok((status, accrual))
            }
            None => Err(RepositoryError::OrderNotFound),
        }
    }

    async fn upsert_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        accrual: f64,
    ) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO orders (id, accrual, status) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET accrual = $2, status = $3",
                &[&id, &accrual, &status.as_db_code()],
            )
            .await?;
        Ok(())
    }

    async fn match_products(&self, description: &str) -> Result<Vec<Product>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT match_text, reward, reward_type FROM products", &[])
            .await?;

        let products = rows
            .into_iter()
            .filter_map(|row| {
                let match_text: String = row.get("match_text");
                if !description.contains(&match_text) {
                    return None;
                }
                let reward: f64 = row.get("reward");
                let reward_type_code: i16 = row.get("reward_type");
                let reward_type = model::RewardType::from_db_code(reward_type_code)?;
                Some(Product {
                    match_text,
                    reward,
                    reward_type,
                })
            })
            .collect();

        Ok(products)
    }

    async fn register_product(&self, product: &Product) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let result = client
            .execute(
                "INSERT INTO products (match_text, reward, reward_type) VALUES ($1, $2, $3)",
                &[
                    &product.match_text,
                    &product.reward,
                    &product.reward_type.as_db_code(),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    Err(RepositoryError::ProductAlreadyRegistered)
                } else {
                    Err(RepositoryError::Db(e))
                }
            }
        }
    }

    async fn enqueue_order(&self, id: &str, payload: &[u8]) -> Result<(), RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            "INSERT INTO order_queue (id, info) VALUES ($1, $2)",
            &[&id, &payload],
        )
        .await?;

        tx.execute(
            "INSERT INTO orders (id, accrual, status) VALUES ($1, 0, $2)",
            &[&id, &OrderStatus::Registered.as_db_code()],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn dequeue_order(&self, id: &str) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM order_queue WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn list_pending_orders(&self) -> Result<Vec<(String, Vec<u8>)>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT id, info FROM order_queue", &[]).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("info")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `match_products`' substring test is symmetric to registration order:
    /// this exercises just the Rust-side filtering logic the real
    /// `PgStore::match_products` uses after the table scan, since spinning
    /// up Postgres is out of scope for a unit test.
    #[test]
    fn substring_matching_is_independent_of_registration_order() {
        fn matches(products: &[Product], description: &str) -> Vec<String> {
            products
                .iter()
                .filter(|p| description.contains(&p.match_text))
                .map(|p| p.match_text.clone())
                .collect()
        }

        let bork = Product {
            match_text: "Bork".into(),
            reward: 10.0,
            reward_type: model::RewardType::Percent,
        };
        let iphone = Product {
            match_text: "iPhone".into(),
            reward: 500.0,
            reward_type: model::RewardType::Points,
        };

        let order_a = vec![bork.clone(), iphone.clone()];
        let order_b = vec![iphone, bork];

        let description = "Bork microwave and an iPhone 15";
        let mut a = matches(&order_a, description);
        let mut b = matches(&order_b, description);
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(a, vec!["Bork".to_string(), "iPhone".to_string()]);
    }

    #[test]
    fn disjoint_products_both_contribute() {
        let products = vec![
            Product {
                match_text: "Bork".into(),
                reward: 10.0,
                reward_type: model::RewardType::Percent,
            },
            Product {
                match_text: "Nothing".into(),
                reward: 5.0,
                reward_type: model::RewardType::Points,
            },
        ];
        let hits: Vec<_> = products
            .iter()
            .filter(|p| "Bork microwave".contains(&p.match_text))
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].match_text, "Bork");
    }
}
