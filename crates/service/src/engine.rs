//! The Dispatcher, worker pool, and committer.
//!
//! `Engine` is the single owner of both channels in the pipeline — the
//! ingress channel (Dispatcher -> workers) and the result channel (workers
//! -> committer) — so no collaborator needs a back-reference to wire
//! itself up, avoiding the cyclic wiring a setter-based design would need.

use std::sync::Arc;

use model::{OrderStatus, OrderSubmission, RewardType};
use repository::{RepositoryError, Store};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument};

use crate::validator::{validate_order, ValidationError};

/// Errors the Register path can return to the HTTP caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("incorrect format: {0}")]
    IncorrectFormat(String),
    #[error("order already registered")]
    OrderAlreadyRegistered,
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}

impl From<ValidationError> for DispatchError {
    fn from(e: ValidationError) -> Self {
        DispatchError::IncorrectFormat(e.0)
    }
}

/// The outcome of computing accrual for one order.
struct AccrualResult {
    id: String,
    accrual: f64,
    err: Option<String>,
}

/// Channel capacity for the ingress and per-worker/result channels.
///
/// An unbuffered rendezvous channel would block publication until a
/// worker is free. `tokio::sync::mpsc` requires a capacity of at least 1;
/// a capacity of 1 is the closest bounded approximation available in the
/// async runtime and preserves the backpressure this pipeline relies on
/// (see DESIGN.md).
const CHANNEL_CAPACITY: usize = 1;

/// Owns the ingress/result channels and the Dispatcher's enqueue path.
pub struct Engine {
    store: Arc<dyn Store>,
    ingress_tx: mpsc::Sender<OrderSubmission>,
}

impl Engine {
    /// Starts `worker_count` workers plus the fan-out, fan-in, and
    /// committer tasks, and returns the handle used to register orders and
    /// to run startup recovery.
    pub fn spawn(store: Arc<dyn Store>, worker_count: usize) -> Arc<Engine> {
        let worker_count = worker_count.max(1);
        let (ingress_tx, ingress_rx) = mpsc::channel::<OrderSubmission>(CHANNEL_CAPACITY);

        let worker_rxs = fan_out(ingress_rx, worker_count);

        let mut result_rxs = Vec::with_capacity(worker_count);
        for worker_rx in worker_rxs {
            let (result_tx, result_rx) = mpsc::channel::<AccrualResult>(CHANNEL_CAPACITY);
            tokio::spawn(run_worker(Arc::clone(&store), worker_rx, result_tx));
            result_rxs.push(result_rx);
        }

        let committer_rx = fan_in(result_rxs);
        tokio::spawn(run_committer(Arc::clone(&store), committer_rx));

        Arc::new(Engine { store, ingress_tx })
    }

    /// Register path: parse, validate, duplicate-check, durably enqueue,
    /// then publish to the pipeline in the background so the caller's
    /// `202` does not wait on worker availability.
    #[instrument(skip(self, raw))]
    pub async fn register(&self, raw: &[u8]) -> Result<(), DispatchError> {
        let submission: OrderSubmission = serde_json::from_slice(raw)
            .map_err(|e| DispatchError::IncorrectFormat(e.to_string()))?;

        validate_order(&submission)?;

        match self.store.get_order_status(&submission.order).await {
            Ok(_) => return Err(DispatchError::OrderAlreadyRegistered),
            Err(RepositoryError::OrderNotFound) => {}
            Err(e) => return Err(DispatchError::Store(e)),
        }

        self.store.enqueue_order(&submission.order, raw).await?;

        let tx = self.ingress_tx.clone();
        let order_id = submission.order.clone();
        tokio::spawn(async move {
            if tx.send(submission).await.is_err() {
                error!(order = %order_id, "ingress channel closed; order awaits next startup recovery");
            }
        });

        Ok(())
    }

    /// Startup recovery: reseed the pipeline from durable queue contents
    /// before HTTP traffic is accepted. Anything still in the queue is
    /// REGISTERED or PROCESSING; the first worker step normalizes it back
    /// to REGISTERED.
    #[instrument(skip(self))]
    pub async fn recover(&self) {
        let pending = match self.store.list_pending_orders().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "failed to list pending orders during startup recovery");
                return;
            }
        };

        debug!(count = pending.len(), "recovering pending orders");
        for (id, payload) in pending {
            match serde_json::from_slice::<OrderSubmission>(&payload) {
                Ok(submission) => {
                    if self.ingress_tx.send(submission).await.is_err() {
                        error!(order = %id, "ingress channel closed during recovery");
                    }
                }
                Err(e) => {
                    error!(order = %id, error = %e, "failed to decode queued payload during recovery");
                }
            }
        }
    }
}

/// Distributes items from `rx` to `n` worker channels in strict
/// round-robin so no worker starves.
fn fan_out(
    mut rx: mpsc::Receiver<OrderSubmission>,
    n: usize,
) -> Vec<mpsc::Receiver<OrderSubmission>> {
    let mut senders = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        senders.push(tx);
        receivers.push(rx);
    }

    tokio::spawn(async move {
        let mut next = 0;
        while let Some(order) = rx.recv().await {
            if senders[next].send(order).await.is_err() {
                error!(worker = next, "worker channel closed unexpectedly during fan-out");
            }
            next = (next + 1) % senders.len();
        }
        // Dropping `senders` here closes every worker channel, which lets
        // each worker's `recv` loop end and its result channel close too.
    });

    receivers
}

/// Merges `n` worker result channels into a single channel for the
/// committer.
fn fan_in(receivers: Vec<mpsc::Receiver<AccrualResult>>) -> mpsc::Receiver<AccrualResult> {
    let n = receivers.len().max(1);
    let (tx, rx) = mpsc::channel(n);
    for mut worker_rx in receivers {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(result) = worker_rx.recv().await {
                if tx.send(result).await.is_err() {
                    break;
                }
            }
        });
    }
    rx
}

/// One long-lived worker: claims PROCESSING, computes accrual against
/// the product registry, emits the result.
async fn run_worker(
    store: Arc<dyn Store>,
    mut rx: mpsc::Receiver<OrderSubmission>,
    result_tx: mpsc::Sender<AccrualResult>,
) {
    while let Some(order) = rx.recv().await {
        debug!(order = %order.order, "order start processing");
        if let Err(e) = store
            .upsert_order_status(&order.order, OrderStatus::Processing, 0.0)
            .await
        {
            error!(order = %order.order, error = %e, "failed to mark order PROCESSING");
        }

        let result = compute_accrual(&*store, &order).await;
        if result_tx.send(result).await.is_err() {
            break;
        }
    }
}

/// For each good, sum the contribution of every matching product.
/// `POINTS` adds the reward flat; `PERCENT` adds `0.01 * reward * price`.
/// Unknown reward types never reach here — `model::RewardType` only has
/// two variants — but a Store bug returning an unmapped DB code is
/// filtered out by `PgStore::match_products` before this point, so there
/// is no "unknown reward type" error path to construct.
async fn compute_accrual(store: &dyn Store, order: &OrderSubmission) -> AccrualResult {
    let mut accrual = 0.0;
    for good in &order.goods {
        let products = match store.match_products(&good.description).await {
            Ok(products) => products,
            Err(e) => {
                return AccrualResult {
                    id: order.order.clone(),
                    accrual: 0.0,
                    err: Some(e.to_string()),
                };
            }
        };

        for product in products {
            match product.reward_type {
                RewardType::Points => accrual += product.reward,
                RewardType::Percent => accrual += 0.01 * product.reward * good.price,
            }
        }
    }

    AccrualResult {
        id: order.order.clone(),
        accrual,
        err: None,
    }
}

/// Applies worker results to the Store.
async fn run_committer(store: Arc<dyn Store>, mut rx: mpsc::Receiver<AccrualResult>) {
    while let Some(result) = rx.recv().await {
        if let Some(err) = result.err {
            error!(order = %result.id, error = %err, "order computation failed");
            requeue(&store, &result.id).await;
            continue;
        }

        match store
            .upsert_order_status(&result.id, OrderStatus::Processed, result.accrual)
            .await
        {
            Ok(()) => {
                if let Err(e) = store.dequeue_order(&result.id).await {
                    error!(order = %result.id, error = %e, "failed to dequeue processed order");
                }
                debug!(order = %result.id, accrual = result.accrual, "order processed");
            }
            Err(e) => {
                error!(order = %result.id, error = %e, "failed to commit PROCESSED status");
                requeue(&store, &result.id).await;
            }
        }
    }
}

/// Compensating write back to REGISTERED so the order remains eligible for
/// retry. If this also fails, the row stays queued and is picked up
/// again by startup recovery.
async fn requeue(store: &Arc<dyn Store>, id: &str) {
    if let Err(e) = store.upsert_order_status(id, OrderStatus::Registered, 0.0).await {
        error!(order = %id, error = %e, "compensating upsert to REGISTERED failed; row remains queued for next startup recovery");
    }
}
