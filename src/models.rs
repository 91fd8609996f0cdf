use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    checkout::Address,
    status::{OrderStatus, PaymentStatus},
};

// Orders

/// Order header. `id` doubles as the payment gateway reference.
///
/// Money fields are minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub email: String,
    pub phone: Option<String>,
    pub other_contact: Option<String>,
    pub shipping_address: Address,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub currency: String,
    pub total_amount: i64,
    pub shipping_cost: i64,
    pub tax_amount: i64,
    pub discount_amount: i64,
    pub tracking_number: Option<String>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Bumped on every write; writers compare-and-set against it.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Gateway reference for this order.
    pub fn reference(&self) -> String {
        self.id.to_string()
    }

    /// Σ(item subtotal) + shipping + tax − discount; `None` on overflow.
    pub fn expected_total(&self, items: &[OrderItem]) -> Option<i64> {
        items
            .iter()
            .try_fold(0i64, |total, item| total.checked_add(item.subtotal))?
            .checked_add(self.shipping_cost)?
            .checked_add(self.tax_amount)?
            .checked_sub(self.discount_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i32,
    pub price_each: i64,
    pub discount_per_item: i64,
    pub subtotal: i64,
    pub is_refunded: bool,
}

impl OrderItem {
    pub fn subtotal_for(quantity: i32, price_each: i64, discount_per_item: i64) -> Option<i64> {
        let quantity = i64::from(quantity);
        quantity
            .checked_mul(price_each)?
            .checked_sub(discount_per_item.checked_mul(quantity)?)
    }
}

// Payments

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub method: String,
    pub amount: i64,
    pub payment_status: PaymentStatus,
    /// Set once, by the verifier, to the gateway reference it confirmed.
    pub transaction_ref: Option<String>,
    /// Receipt link or receipt number issued by the gateway, when it issues one.
    pub receipt_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Order, its line items and its payment record; written and read as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderAggregate {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment: Payment,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .payment_status
                .is_none_or(|payment_status| order.payment_status == payment_status)
    }
}

/// Everything the verifier writes when a gateway reference is confirmed.
#[derive(Debug, Clone)]
pub struct PaymentSettlement {
    /// The order as it should look afterwards, with its version already bumped.
    pub order: Order,
    pub expected_version: i32,
    pub transaction_ref: String,
    pub method: String,
    pub amount: i64,
    pub receipt_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call recorded the payment.
    Applied(Payment),
    /// The payment row already carried a transaction reference; nothing was written.
    AlreadySettled(Payment),
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;

    use super::*;

    pub(crate) fn sample_order() -> Order {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-20250301-0000ABCD".into(),
            email: "buyer@example.com".into(),
            phone: None,
            other_contact: None,
            shipping_address: Address::default(),
            notes: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            currency: "KES".into(),
            total_amount: 2000,
            shipping_cost: 0,
            tax_amount: 0,
            discount_amount: 0,
            tracking_number: None,
            estimated_delivery_at: None,
            shipped_at: None,
            delivered_at: None,
            version: 1,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn subtotal_subtracts_per_item_discount() {
        assert_eq!(OrderItem::subtotal_for(3, 1000, 100), Some(2700));
        assert_eq!(OrderItem::subtotal_for(1, 500, 0), Some(500));
        assert_eq!(OrderItem::subtotal_for(2, i64::MAX / 2 + 1, 0), None);
    }

    #[test]
    fn filter_matches_on_both_axes() {
        let order = sample_order();
        assert!(OrderFilter::default().matches(&order));
        assert!(
            OrderFilter {
                status: Some(OrderStatus::Pending),
                payment_status: Some(PaymentStatus::Unpaid),
            }
            .matches(&order)
        );
        assert!(
            !OrderFilter {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            }
            .matches(&order)
        );
    }
}
