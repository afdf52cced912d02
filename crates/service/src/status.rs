//! Status service: read-only projection of order state for the
//! `GET /api/orders/{number}` handler.

use std::sync::Arc;

use model::OrderRewardResponse;
use repository::{RepositoryError, Store};

/// Wraps a [`Store`] and turns "no such order" into the `INVALID` response
/// the HTTP edge is expected to return, rather than an error.
pub struct StatusService {
    store: Arc<dyn Store>,
}

impl StatusService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Looks up `id` and shapes it into the wire response. Any store error
    /// other than "not found" propagates so the HTTP layer can return a 500.
    pub async fn get_order_reward(&self, id: &str) -> Result<OrderRewardResponse, RepositoryError> {
        match self.store.get_order_status(id).await {
            Ok((status, accrual)) => Ok(OrderRewardResponse::from_status(
                id.to_string(),
                status,
                accrual,
            )),
            Err(RepositoryError::OrderNotFound) => Ok(OrderRewardResponse::invalid(id.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::{OrderStatus, Product};
    use std::sync::Mutex;

    struct FakeStore {
        order: Mutex<Option<(OrderStatus, f64)>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get_order_status(&self, _id: &str) -> Result<(OrderStatus, f64), RepositoryError> {
            self.order
                .lock()
                .unwrap()
                .clone()
                .ok_or(RepositoryError::OrderNotFound)
        }
        async fn upsert_order_status(
            &self,
            _id: &str,
            _status: OrderStatus,
            _accrual: f64,
        ) -> Result<(), RepositoryError> {
            unimplemented!()
        }
        async fn match_products(&self, _description: &str) -> Result<Vec<Product>, RepositoryError> {
            unimplemented!()
        }
        async fn register_product(&self, _product: &Product) -> Result<(), RepositoryError> {
            unimplemented!()
        }
        async fn enqueue_order(&self, _id: &str, _payload: &[u8]) -> Result<(), RepositoryError> {
            unimplemented!()
        }
        async fn dequeue_order(&self, _id: &str) -> Result<(), RepositoryError> {
            unimplemented!()
        }
        async fn list_pending_orders(&self) -> Result<Vec<(String, Vec<u8>)>, RepositoryError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn unknown_order_reports_invalid() {
        let store = Arc::new(FakeStore {
            order: Mutex::new(None),
        });
        let svc = StatusService::new(store);
        let resp = svc.get_order_reward("00000000000").await.unwrap();
        assert_eq!(resp.status, OrderStatus::Invalid);
        assert_eq!(resp.accrual, None);
    }

    #[tokio::test]
    async fn processed_order_reports_accrual() {
        let store = Arc::new(FakeStore {
            order: Mutex::new(Some((OrderStatus::Processed, 729.98))),
        });
        let svc = StatusService::new(store);
        let resp = svc.get_order_reward("12345678903").await.unwrap();
        assert_eq!(resp.status, OrderStatus::Processed);
        assert_eq!(resp.accrual, Some(729.98));
    }

    #[tokio::test]
    async fn registered_order_omits_accrual() {
        let store = Arc::new(FakeStore {
            order: Mutex::new(Some((OrderStatus::Registered, 0.0))),
        });
        let svc = StatusService::new(store);
        let resp = svc.get_order_reward("12345678903").await.unwrap();
        assert_eq!(resp.status, OrderStatus::Registered);
        assert_eq!(resp.accrual, None);
    }
}
