use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    models::{Order, OrderAggregate, OrderFilter, PaymentSettlement, SettleOutcome},
    outbox::OutboxMessage,
    repository::{OrderAmendment, OrderRepository, RepositoryError},
    status::PaymentStatus,
};

#[derive(Default)]
struct State {
    aggregates: HashMap<Uuid, OrderAggregate>,
    transaction_refs: HashSet<String>,
    outbox: Vec<OutboxMessage>,
}

/// Order storage held in process memory.
///
/// One lock guards all tables, so each call is atomic the same way a database transaction is.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    state: Mutex<State>,
    fail_on_write: RwLock<bool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail without touching stored data.
    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.aggregates.len()
    }

    async fn check_writable(&self) -> Result<(), RepositoryError> {
        if *self.fail_on_write.read().await {
            return Err(RepositoryError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

fn stored_order<'a>(
    state: &'a mut State,
    order_id: Uuid,
    expected_version: i32,
) -> Result<&'a mut OrderAggregate, RepositoryError> {
    let aggregate = state
        .aggregates
        .get_mut(&order_id)
        .ok_or(RepositoryError::NotFound(order_id))?;
    if aggregate.order.version != expected_version {
        return Err(RepositoryError::Conflict {
            order_id,
            expected: expected_version,
        });
    }
    Ok(aggregate)
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(
        &self,
        aggregate: &OrderAggregate,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError> {
        self.check_writable().await?;
        let mut state = self.state.lock().await;
        if state.aggregates.contains_key(&aggregate.order.id) {
            return Err(RepositoryError::Unavailable(format!(
                "duplicate order id {}",
                aggregate.order.id
            )));
        }
        state
            .aggregates
            .insert(aggregate.order.id, aggregate.clone());
        state.outbox.extend(outbox);
        Ok(())
    }

    async fn find(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, RepositoryError> {
        Ok(self.state.lock().await.aggregates.get(&order_id).cloned())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .aggregates
            .values()
            .map(|aggregate| &aggregate.order)
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_order(
        &self,
        order: &Order,
        expected_version: i32,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError> {
        self.check_writable().await?;
        let mut state = self.state.lock().await;
        let aggregate = stored_order(&mut state, order.id, expected_version)?;
        aggregate.order = order.clone();
        state.outbox.extend(outbox);
        Ok(())
    }

    async fn amend(
        &self,
        amendment: &OrderAmendment,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError> {
        self.check_writable().await?;
        let mut state = self.state.lock().await;
        let aggregate = stored_order(
            &mut state,
            amendment.order.id,
            amendment.expected_version,
        )?;
        aggregate.order = amendment.order.clone();
        aggregate.items = amendment.items.clone();
        aggregate.payment.amount = amendment.payment_amount;
        aggregate.payment.method = amendment.payment_method.clone();
        state.outbox.extend(outbox);
        Ok(())
    }

    async fn settle_payment(
        &self,
        settlement: &PaymentSettlement,
        outbox: Vec<OutboxMessage>,
    ) -> Result<SettleOutcome, RepositoryError> {
        self.check_writable().await?;
        let mut state = self.state.lock().await;
        let order_id = settlement.order.id;

        let current = state
            .aggregates
            .get(&order_id)
            .ok_or(RepositoryError::NotFound(order_id))?;
        if current.payment.transaction_ref.is_some()
            || state.transaction_refs.contains(&settlement.transaction_ref)
        {
            return Ok(SettleOutcome::AlreadySettled(current.payment.clone()));
        }

        let aggregate = stored_order(&mut state, order_id, settlement.expected_version)?;
        aggregate.order = settlement.order.clone();
        let payment = &mut aggregate.payment;
        payment.payment_status = PaymentStatus::Paid;
        payment.transaction_ref = Some(settlement.transaction_ref.clone());
        payment.method = settlement.method.clone();
        payment.amount = settlement.amount;
        payment.receipt_url = settlement.receipt_url.clone();
        payment.completed_at = Some(settlement.completed_at);
        let payment = payment.clone();

        state
            .transaction_refs
            .insert(settlement.transaction_ref.clone());
        state.outbox.extend(outbox);
        Ok(SettleOutcome::Applied(payment))
    }
}
