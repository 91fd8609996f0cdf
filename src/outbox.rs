//! Outbox messages recorded in the same write as the aggregate change they describe.
//!
//! A relay outside this service drains the `outbox` table and publishes each row.

use serde::Serialize;
use uuid::Uuid;

use crate::status::{OrderStatus, PaymentStatus};

pub const ORDER_PLACED: &str = "orders.order_placed";
pub const ORDER_AMENDED: &str = "orders.order_amended";
pub const PAYMENT_VERIFIED: &str = "orders.payment_verified";
pub const STATUS_CHANGED: &str = "orders.status_changed";
pub const PAYMENT_STATUS_CHANGED: &str = "orders.payment_status_changed";
pub const TRACKING_UPDATED: &str = "orders.tracking_updated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub event_type: String,
    pub payload: String,
}

impl OutboxMessage {
    pub fn new<T: Serialize>(event_type: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.to_string(),
            payload: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct OrderPlacedEvent<'a> {
    pub order_id: Uuid,
    pub order_number: &'a str,
    pub total_amount: i64,
    pub currency: &'a str,
}

#[derive(Debug, Serialize)]
pub struct PaymentVerifiedEvent<'a> {
    pub order_id: Uuid,
    pub transaction_ref: &'a str,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusChangedEvent {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusChangedEvent {
    pub order_id: Uuid,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct TrackingUpdatedEvent<'a> {
    pub order_id: Uuid,
    pub tracking_number: &'a str,
}
