//! Order and payment status state machine.
//!
//! Order status runs along `pending → confirmed → processing → shipped → delivered`, with
//! `cancelled` and `refunded` as side exits from any non-terminal status. Payment status is a
//! separate axis: `unpaid → paid | partially_paid → refunded`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    PartiallyPaid,
    Refunded,
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The automated payment verifier.
    Verifier,
    /// A human using the admin console. May skip ahead and ignore payment prerequisites.
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Illegal order transition from {from} to {to}")]
    IllegalOrderTransition { from: OrderStatus, to: OrderStatus },

    #[error("Illegal payment transition from {from} to {to}")]
    IllegalPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Cannot move order to {to} while payment is {payment}")]
    PaymentPrerequisite {
        to: OrderStatus,
        payment: PaymentStatus,
    },
}

/// Caller-supplied timestamps for the once-only fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
pub struct StatusExtras {
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Position on the happy path; side exits have none.
    const fn step(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled | OrderStatus::Refunded => None,
        }
    }
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| StatusError::InvalidStatus(s.to_string()))
    }
}

impl FromStr for PaymentStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "partially_paid" => Ok(PaymentStatus::PartiallyPaid),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(StatusError::InvalidStatus(s.to_string())),
        }
    }
}

/// Checks an order status move without touching any state.
///
/// Returns `Ok(false)` when `to` equals the current status.
pub fn check_order_transition(
    from: OrderStatus,
    to: OrderStatus,
    payment: PaymentStatus,
    actor: Actor,
) -> Result<bool, StatusError> {
    if from == to {
        return Ok(false);
    }
    let illegal = StatusError::IllegalOrderTransition { from, to };
    if from.is_terminal() {
        return Err(illegal);
    }

    match (from.step(), to.step()) {
        // side exits
        (_, None) => Ok(true),
        (Some(current), Some(target)) if target > current => match actor {
            Actor::Operator => Ok(true),
            Actor::Verifier => {
                if (from, to) != (OrderStatus::Pending, OrderStatus::Confirmed) {
                    return Err(illegal);
                }
                if payment != PaymentStatus::Paid {
                    return Err(StatusError::PaymentPrerequisite { to, payment });
                }
                Ok(true)
            }
        },
        _ => Err(illegal),
    }
}

pub fn check_payment_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool, StatusError> {
    use PaymentStatus::*;

    match (from, to) {
        _ if from == to => Ok(false),
        (Unpaid, Paid | PartiallyPaid) | (PartiallyPaid, Paid) | (Paid | PartiallyPaid, Refunded) => {
            Ok(true)
        }
        _ => Err(StatusError::IllegalPaymentTransition { from, to }),
    }
}

/// Moves `order` to `to`, stamping `shipped_at`/`delivered_at` only if they are still unset.
///
/// Returns whether anything changed. On error the order is left untouched.
pub fn apply_order_status(
    order: &mut Order,
    to: OrderStatus,
    actor: Actor,
    extras: StatusExtras,
    now: DateTime<Utc>,
) -> Result<bool, StatusError> {
    if !check_order_transition(order.status, to, order.payment_status, actor)? {
        return Ok(false);
    }

    order.status = to;
    match to {
        OrderStatus::Shipped if order.shipped_at.is_none() => {
            order.shipped_at = Some(extras.shipped_at.unwrap_or(now));
        }
        OrderStatus::Delivered if order.delivered_at.is_none() => {
            order.delivered_at = Some(extras.delivered_at.unwrap_or(now));
        }
        _ => {}
    }
    Ok(true)
}

pub fn apply_payment_status(order: &mut Order, to: PaymentStatus) -> Result<bool, StatusError> {
    if !check_payment_transition(order.payment_status, to)? {
        return Ok(false);
    }
    order.payment_status = to;
    Ok(true)
}
