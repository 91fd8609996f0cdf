//! Durable storage for the order aggregate.
//!
//! Implementations:
//! - `PgOrderRepository`: Postgres through diesel-async
//! - `InMemoryOrderRepository`: process-local, for tests and local runs
//!
//! Every write is atomic across the order, its items, its payment row and the outbox messages
//! passed alongside it. Order writes are compare-and-set on `Order::version`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::{Order, OrderAggregate, OrderFilter, OrderItem, PaymentSettlement, SettleOutcome},
    outbox::OutboxMessage,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOrderRepository;
pub use postgres::PgOrderRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order {order_id} was modified concurrently (expected version {expected})")]
    Conflict { order_id: Uuid, expected: i32 },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Failed to obtain a DB connection: {0}")]
    Pool(String),

    #[error("Stored row is inconsistent: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Fields replaced when a still-unpaid order is rebuilt from a newer cart.
#[derive(Debug, Clone)]
pub struct OrderAmendment {
    /// The order as it should look afterwards, with its version already bumped.
    pub order: Order,
    pub expected_version: i32,
    pub items: Vec<OrderItem>,
    pub payment_amount: i64,
    pub payment_method: String,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts order, items and payment placeholder together, or nothing.
    async fn insert(
        &self,
        aggregate: &OrderAggregate,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError>;

    async fn find(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, RepositoryError>;

    /// Orders matching `filter`, newest first.
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    /// Overwrites the order row if its stored version still equals `expected_version`.
    async fn update_order(
        &self,
        order: &Order,
        expected_version: i32,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError>;

    /// Replaces line items and the payment placeholder amount along with the order row.
    async fn amend(
        &self,
        amendment: &OrderAmendment,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError>;

    /// Records a verified payment.
    ///
    /// Claims the payment row only while its `transaction_ref` is unset, then writes the order
    /// under version compare-and-set. If the row is already claimed nothing is written and
    /// `AlreadySettled` is returned; a version mismatch rolls the claim back and fails with
    /// `Conflict`.
    async fn settle_payment(
        &self,
        settlement: &PaymentSettlement,
        outbox: Vec<OutboxMessage>,
    ) -> Result<SettleOutcome, RepositoryError>;
}
