//! Order placement and administration.
//!
//! All writes go through [`OrderRepository`] and carry their outbox messages with them. Updates
//! to an existing order re-read it and re-evaluate the change whenever another writer got there
//! first, up to [`MAX_WRITE_ATTEMPTS`] times.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    cart::{CartItem, MAX_CART_ITEMS},
    checkout::CheckoutData,
    config::CheckoutConfig,
    models::{Order, OrderAggregate, OrderFilter, OrderItem, Payment},
    outbox::{
        self, OrderPlacedEvent, OutboxMessage, PaymentStatusChangedEvent, StatusChangedEvent,
        TrackingUpdatedEvent,
    },
    repository::{OrderAmendment, OrderRepository, RepositoryError},
    status::{self, Actor, OrderStatus, PaymentStatus, StatusError, StatusExtras},
};

pub const MAX_WRITE_ATTEMPTS: usize = 5;
pub const DEFAULT_PAYMENT_METHOD: &str = "paystack";
/// Column width for product ids and tracking numbers.
const MAX_CODE_LEN: usize = 128;
const MAX_METHOD_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Missing or invalid field: {field}")]
    Validation { field: &'static str },

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order {0} is no longer pending and unpaid")]
    NotAmendable(Uuid),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Order {0} kept changing during the update; try again")]
    Contention(Uuid),

    #[error("Failed to encode outbox message: {0}")]
    Outbox(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(RepositoryError),
}

impl From<RepositoryError> for OrderError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(order_id) => OrderError::NotFound(order_id),
            err => OrderError::Persistence(err),
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    currency: String,
    shipping_fee: i64,
}

impl OrderService {
    pub fn new(repository: Arc<dyn OrderRepository>, config: &CheckoutConfig) -> Self {
        Self {
            repository,
            currency: config.currency.clone(),
            shipping_fee: config.shipping_flat_fee,
        }
    }

    /// Creates a pending, unpaid order with its items and a placeholder payment.
    ///
    /// Nothing is written unless every row can be written.
    pub async fn create_order(
        &self,
        checkout: &CheckoutData,
        items: &[CartItem],
    ) -> Result<Order, OrderError> {
        validate(checkout, items)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_items = build_items(order_id, items)?;
        let mut order = Order {
            id: order_id,
            order_number: order_number(order_id, now),
            email: String::new(),
            phone: None,
            other_contact: None,
            shipping_address: Default::default(),
            notes: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            currency: self.currency.clone(),
            total_amount: 0,
            shipping_cost: self.shipping_fee,
            tax_amount: 0,
            discount_amount: 0,
            tracking_number: None,
            estimated_delivery_at: None,
            shipped_at: None,
            delivered_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        fill_from_checkout(&mut order, checkout);
        order.total_amount = order_total(&order, &order_items)?;

        let payment = Payment {
            id: Uuid::new_v4(),
            order_id,
            method: payment_method(checkout),
            amount: order.total_amount,
            payment_status: PaymentStatus::Unpaid,
            transaction_ref: None,
            receipt_url: None,
            created_at: now,
            completed_at: None,
        };
        let message = placed_message(outbox::ORDER_PLACED, &order)?;
        let aggregate = OrderAggregate {
            order,
            items: order_items,
            payment,
        };

        self.repository.insert(&aggregate, vec![message]).await?;
        tracing::info!(
            order_id = %aggregate.order.id,
            order_number = %aggregate.order.order_number,
            total = aggregate.order.total_amount,
            "Order placed"
        );
        Ok(aggregate.order)
    }

    /// Rebuilds a still pending, unpaid order from a newer checkout form and cart.
    pub async fn amend_order(
        &self,
        order_id: Uuid,
        checkout: &CheckoutData,
        items: &[CartItem],
    ) -> Result<Order, OrderError> {
        validate(checkout, items)?;
        let order_items = build_items(order_id, items)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get_order(order_id).await?;
            if current.order.status != OrderStatus::Pending
                || current.order.payment_status != PaymentStatus::Unpaid
                || current.payment.transaction_ref.is_some()
            {
                return Err(OrderError::NotAmendable(order_id));
            }

            let expected_version = current.order.version;
            let mut order = current.order;
            fill_from_checkout(&mut order, checkout);
            order.shipping_cost = self.shipping_fee;
            order.total_amount = order_total(&order, &order_items)?;
            order.version = expected_version + 1;
            order.updated_at = Utc::now();

            let amendment = OrderAmendment {
                payment_amount: order.total_amount,
                payment_method: payment_method(checkout),
                items: order_items.clone(),
                order,
                expected_version,
            };
            let message = placed_message(outbox::ORDER_AMENDED, &amendment.order)?;
            match self.repository.amend(&amendment, vec![message]).await {
                Ok(()) => {
                    tracing::info!(%order_id, total = amendment.order.total_amount, "Order amended");
                    return Ok(amendment.order);
                }
                Err(RepositoryError::Conflict { .. }) => {
                    tracing::debug!(%order_id, attempt, "Order changed while amending, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrderError::Contention(order_id))
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderAggregate, OrderError> {
        self.repository
            .find(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        Ok(self.repository.list(filter).await?)
    }

    /// Operator status change. An unknown status name fails before the order is read.
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: &str,
        extras: StatusExtras,
    ) -> Result<Order, OrderError> {
        let to: OrderStatus = new_status.parse()?;
        self.modify(order_id, |order, now| {
            let from = order.status;
            if !status::apply_order_status(order, to, Actor::Operator, extras, now)? {
                return Ok(None);
            }
            let event = StatusChangedEvent { order_id, from, to };
            Ok(Some(vec![OutboxMessage::new(outbox::STATUS_CHANGED, &event)?]))
        })
        .await
    }

    pub async fn update_payment_status(
        &self,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<Order, OrderError> {
        let to: PaymentStatus = new_status.parse()?;
        self.modify(order_id, |order, _| {
            let from = order.payment_status;
            if !status::apply_payment_status(order, to)? {
                return Ok(None);
            }
            let event = PaymentStatusChangedEvent { order_id, from, to };
            Ok(Some(vec![OutboxMessage::new(
                outbox::PAYMENT_STATUS_CHANGED,
                &event,
            )?]))
        })
        .await
    }

    pub async fn update_tracking(
        &self,
        order_id: Uuid,
        tracking_number: &str,
        estimated_delivery_at: Option<DateTime<Utc>>,
    ) -> Result<Order, OrderError> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() || tracking_number.len() > MAX_CODE_LEN {
            return Err(OrderError::Validation {
                field: "tracking_number",
            });
        }

        self.modify(order_id, |order, _| {
            if order.tracking_number.as_deref() == Some(tracking_number)
                && (estimated_delivery_at.is_none()
                    || order.estimated_delivery_at == estimated_delivery_at)
            {
                return Ok(None);
            }
            order.tracking_number = Some(tracking_number.to_string());
            if estimated_delivery_at.is_some() {
                order.estimated_delivery_at = estimated_delivery_at;
            }
            let event = TrackingUpdatedEvent {
                order_id,
                tracking_number,
            };
            Ok(Some(vec![OutboxMessage::new(
                outbox::TRACKING_UPDATED,
                &event,
            )?]))
        })
        .await
    }

    /// Explicit cancellation. The reason, if any, is appended to the order notes.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Order, OrderError> {
        let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());
        self.modify(order_id, |order, now| {
            let from = order.status;
            if !status::apply_order_status(
                order,
                OrderStatus::Cancelled,
                Actor::Operator,
                StatusExtras::default(),
                now,
            )? {
                return Ok(None);
            }
            if let Some(reason) = reason {
                let line = format!("Cancelled: {reason}");
                order.notes = Some(match order.notes.take() {
                    Some(notes) if !notes.is_empty() => format!("{notes}\n{line}"),
                    _ => line,
                });
            }
            let event = StatusChangedEvent {
                order_id,
                from,
                to: OrderStatus::Cancelled,
            };
            Ok(Some(vec![OutboxMessage::new(outbox::STATUS_CHANGED, &event)?]))
        })
        .await
    }

    /// Read, edit, compare-and-set loop for single-row order updates.
    ///
    /// `edit` returns `None` when it made no change, in which case nothing is written.
    async fn modify<F>(&self, order_id: Uuid, mut edit: F) -> Result<Order, OrderError>
    where
        F: FnMut(&mut Order, DateTime<Utc>) -> Result<Option<Vec<OutboxMessage>>, OrderError>
            + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut order = self.get_order(order_id).await?.order;
            let expected_version = order.version;
            let now = Utc::now();
            let Some(messages) = edit(&mut order, now)? else {
                return Ok(order);
            };
            order.version = expected_version + 1;
            order.updated_at = now;

            match self
                .repository
                .update_order(&order, expected_version, messages)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        %order_id,
                        status = %order.status,
                        payment_status = %order.payment_status,
                        version = order.version,
                        "Order updated"
                    );
                    return Ok(order);
                }
                Err(RepositoryError::Conflict { .. }) => {
                    tracing::debug!(%order_id, attempt, "Order changed while updating, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrderError::Contention(order_id))
    }
}

fn validate(checkout: &CheckoutData, items: &[CartItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyCart);
    }
    if items.len() > MAX_CART_ITEMS {
        return Err(OrderError::Validation { field: "items" });
    }
    if let Some(field) = checkout.missing_required_field() {
        return Err(OrderError::Validation { field });
    }
    if checkout
        .payment_method
        .as_deref()
        .is_some_and(|method| method.trim().len() > MAX_METHOD_LEN)
    {
        return Err(OrderError::Validation {
            field: "payment_method",
        });
    }
    if items.iter().any(|item| {
        item.quantity == 0
            || item.unit_price < 0
            || item.id.trim().is_empty()
            || item.id.len() > MAX_CODE_LEN
    }) {
        return Err(OrderError::Validation { field: "items" });
    }
    Ok(())
}

fn build_items(order_id: Uuid, items: &[CartItem]) -> Result<Vec<OrderItem>, OrderError> {
    items
        .iter()
        .map(|item| {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| OrderError::Validation { field: "items" })?;
            Ok(OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: item.id.clone(),
                product_name: item.name.clone(),
                quantity,
                price_each: item.unit_price,
                discount_per_item: 0,
                subtotal: OrderItem::subtotal_for(quantity, item.unit_price, 0)
                    .ok_or(OrderError::Validation { field: "items" })?,
                is_refunded: false,
            })
        })
        .collect()
}

fn fill_from_checkout(order: &mut Order, checkout: &CheckoutData) {
    order.email = checkout.email.trim().to_string();
    order.phone = non_blank(&checkout.phone);
    order.other_contact = non_blank(&checkout.other_contact);
    order.shipping_address = checkout.address.clone();
    order.notes = checkout.note.as_deref().and_then(non_blank);
}

/// The amount the gateway must collect. Must fit in an `i64` and be above zero.
fn order_total(order: &Order, items: &[OrderItem]) -> Result<i64, OrderError> {
    match order.expected_total(items) {
        None => Err(OrderError::Validation { field: "items" }),
        Some(total) if total <= 0 => Err(OrderError::Validation {
            field: "total_amount",
        }),
        Some(total) => Ok(total),
    }
}

fn payment_method(checkout: &CheckoutData) -> String {
    checkout
        .payment_method
        .as_deref()
        .and_then(non_blank)
        .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string())
}

fn placed_message(event_type: &str, order: &Order) -> Result<OutboxMessage, OrderError> {
    let event = OrderPlacedEvent {
        order_id: order.id,
        order_number: &order.order_number,
        total_amount: order.total_amount,
        currency: &order.currency,
    };
    Ok(OutboxMessage::new(event_type, &event)?)
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `ORD-YYYYMMDD-XXXXXXXX`, the suffix taken from the order id.
fn order_number(order_id: Uuid, at: DateTime<Utc>) -> String {
    let suffix = order_id.simple().to_string();
    format!(
        "ORD-{}-{}",
        at.format("%Y%m%d"),
        suffix[..8].to_ascii_uppercase()
    )
}
