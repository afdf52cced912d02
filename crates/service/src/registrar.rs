//! Product registration (`POST /api/goods`): parse, validate, persist.
//! Deliberately synchronous with the request — unlike order
//! registration there is no background pipeline step, since registering a
//! reward rule has no further processing to perform.

use std::sync::Arc;

use model::Product;
use repository::Store;

use crate::engine::DispatchError;
use crate::validator::validate_product;

pub struct Registrar {
    store: Arc<dyn Store>,
}

impl Registrar {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn register(&self, raw: &[u8]) -> Result<(), DispatchError> {
        let product: Product = serde_json::from_slice(raw)
            .map_err(|e| DispatchError::IncorrectFormat(e.to_string()))?;

        validate_product(&product)?;

        self.store.register_product(&product).await?;
        Ok(())
    }
}
