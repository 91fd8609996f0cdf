//! Server-side payment verification.
//!
//! The buyer's popup reporting success is only a hint; an order is marked paid once the gateway
//! itself confirms the transaction. Verification is idempotent per reference: the payment row is
//! claimed only while its `transaction_ref` is unset, so concurrent or repeated calls settle it
//! once and every later call reports the stored result.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    gateway::{GatewayError, GatewayTransaction, TransactionLookup, TransactionStatus},
    models::{OrderAggregate, PaymentSettlement, SettleOutcome},
    order_service::MAX_WRITE_ATTEMPTS,
    outbox::{self, OutboxMessage, PaymentVerifiedEvent, StatusChangedEvent},
    repository::{OrderRepository, RepositoryError},
    status::{self, Actor, OrderStatus, PaymentStatus, StatusError, StatusExtras},
};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Reference {reference} does not belong to order {order_id}")]
    ReferenceMismatch { reference: String, order_id: Uuid },

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Gateway reports transaction {reference} as {status:?}")]
    NotSuccessful {
        reference: String,
        status: TransactionStatus,
    },

    #[error("Currency mismatch: order is in {expected}, gateway charged {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Amount paid {paid} is below the order total {expected}")]
    Underpaid { paid: i64, expected: i64 },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Order {0} kept changing during verification; try again")]
    Contention(Uuid),

    #[error("Failed to encode outbox message: {0}")]
    Outbox(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(#[from] RepositoryError),
}

impl VerifyError {
    /// The gateway answered and the payment does not check out, as opposed to an
    /// infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            VerifyError::ReferenceMismatch { .. }
                | VerifyError::NotSuccessful { .. }
                | VerifyError::CurrencyMismatch { .. }
                | VerifyError::Underpaid { .. }
                | VerifyError::Status(_)
        ) || matches!(self, VerifyError::Gateway(GatewayError::Rejected { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Verification {
    pub success: bool,
    pub order_id: Uuid,
    /// True when an earlier call had already recorded this payment.
    pub already_verified: bool,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl Verification {
    fn from_aggregate(aggregate: &OrderAggregate, already_verified: bool) -> Self {
        Self {
            success: true,
            order_id: aggregate.order.id,
            already_verified,
            status: aggregate.order.status,
            payment_status: aggregate.order.payment_status,
        }
    }
}

#[derive(Clone)]
pub struct PaymentVerifier {
    repository: Arc<dyn OrderRepository>,
    lookup: Arc<dyn TransactionLookup>,
}

impl PaymentVerifier {
    pub fn new(repository: Arc<dyn OrderRepository>, lookup: Arc<dyn TransactionLookup>) -> Self {
        Self { repository, lookup }
    }

    pub async fn verify(&self, reference: &str, order_id: Uuid) -> Result<Verification, VerifyError> {
        let reference = reference.trim();
        if reference != order_id.to_string() {
            return Err(VerifyError::ReferenceMismatch {
                reference: reference.to_string(),
                order_id,
            });
        }

        let aggregate = self.load(order_id).await?;
        if aggregate.payment.transaction_ref.is_some() {
            tracing::info!(%order_id, "Payment already verified");
            return Ok(Verification::from_aggregate(&aggregate, true));
        }

        let transaction = self.lookup.verify_transaction(reference).await?;
        check_transaction(&aggregate, reference, &transaction).inspect_err(|err| {
            tracing::warn!(%order_id, %reference, error = %err, "Payment verification failed");
        })?;

        let mut aggregate = aggregate;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            if attempt > 1 {
                aggregate = self.load(order_id).await?;
                if aggregate.payment.transaction_ref.is_some() {
                    return Ok(Verification::from_aggregate(&aggregate, true));
                }
            }

            let (settlement, messages) = settle(&aggregate, reference, &transaction)?;
            match self.repository.settle_payment(&settlement, messages).await {
                Ok(SettleOutcome::Applied(payment)) => {
                    tracing::info!(
                        %order_id,
                        transaction_ref = %reference,
                        amount = payment.amount,
                        status = %settlement.order.status,
                        "Payment verified"
                    );
                    let settled = OrderAggregate {
                        order: settlement.order,
                        items: aggregate.items,
                        payment,
                    };
                    return Ok(Verification::from_aggregate(&settled, false));
                }
                Ok(SettleOutcome::AlreadySettled(_)) => {
                    let current = self.load(order_id).await?;
                    return Ok(Verification::from_aggregate(&current, true));
                }
                Err(RepositoryError::Conflict { .. }) => {
                    tracing::debug!(%order_id, attempt, "Order changed while settling, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(VerifyError::Contention(order_id))
    }

    async fn load(&self, order_id: Uuid) -> Result<OrderAggregate, VerifyError> {
        self.repository
            .find(order_id)
            .await?
            .ok_or(VerifyError::OrderNotFound(order_id))
    }
}

fn check_transaction(
    aggregate: &OrderAggregate,
    reference: &str,
    transaction: &GatewayTransaction,
) -> Result<(), VerifyError> {
    if transaction.reference != reference {
        return Err(VerifyError::ReferenceMismatch {
            reference: transaction.reference.clone(),
            order_id: aggregate.order.id,
        });
    }
    if transaction.status != TransactionStatus::Success {
        return Err(VerifyError::NotSuccessful {
            reference: reference.to_string(),
            status: transaction.status.clone(),
        });
    }
    if !transaction
        .currency
        .eq_ignore_ascii_case(&aggregate.order.currency)
    {
        return Err(VerifyError::CurrencyMismatch {
            expected: aggregate.order.currency.clone(),
            actual: transaction.currency.clone(),
        });
    }
    if transaction.amount <= 0 || transaction.amount < aggregate.order.total_amount {
        return Err(VerifyError::Underpaid {
            paid: transaction.amount,
            expected: aggregate.order.total_amount,
        });
    }
    Ok(())
}

/// Builds the write for a confirmed transaction against the order as last read.
fn settle(
    aggregate: &OrderAggregate,
    reference: &str,
    transaction: &GatewayTransaction,
) -> Result<(PaymentSettlement, Vec<OutboxMessage>), VerifyError> {
    let now = Utc::now();
    let mut order = aggregate.order.clone();
    let expected_version = order.version;

    status::apply_payment_status(&mut order, PaymentStatus::Paid)?;
    let mut messages = vec![OutboxMessage::new(
        outbox::PAYMENT_VERIFIED,
        &PaymentVerifiedEvent {
            order_id: order.id,
            transaction_ref: reference,
            amount: transaction.amount,
        },
    )?];

    // Only a pending order is confirmed; anything an operator already moved stays where it is.
    if order.status == OrderStatus::Pending {
        status::apply_order_status(
            &mut order,
            OrderStatus::Confirmed,
            Actor::Verifier,
            StatusExtras::default(),
            now,
        )?;
        messages.push(OutboxMessage::new(
            outbox::STATUS_CHANGED,
            &StatusChangedEvent {
                order_id: order.id,
                from: OrderStatus::Pending,
                to: OrderStatus::Confirmed,
            },
        )?);
    }
    order.version = expected_version + 1;
    order.updated_at = now;

    let settlement = PaymentSettlement {
        order,
        expected_version,
        transaction_ref: reference.to_string(),
        method: transaction
            .channel
            .clone()
            .unwrap_or_else(|| aggregate.payment.method.clone()),
        amount: transaction.amount,
        receipt_url: transaction.receipt_number.clone(),
        completed_at: transaction.paid_at.unwrap_or(now),
    };
    Ok((settlement, messages))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        cart::CartItem, checkout::CheckoutData, config::CheckoutConfig,
        order_service::OrderService, repository::InMemoryOrderRepository,
    };

    struct FixedLookup {
        status: TransactionStatus,
        amount: i64,
        currency: &'static str,
        receipt_number: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedLookup {
        fn success(amount: i64) -> Self {
            Self {
                status: TransactionStatus::Success,
                amount,
                currency: "KES",
                receipt_number: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TransactionLookup for FixedLookup {
        async fn verify_transaction(
            &self,
            reference: &str,
        ) -> Result<GatewayTransaction, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayTransaction {
                reference: reference.to_string(),
                status: self.status.clone(),
                amount: self.amount,
                currency: self.currency.to_string(),
                channel: Some("card".into()),
                paid_at: None,
                receipt_number: self.receipt_number.map(str::to_string),
            })
        }
    }

    async fn placed_order(
        lookup: FixedLookup,
    ) -> (PaymentVerifier, OrderService, Arc<FixedLookup>, Uuid) {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let service = OrderService::new(repository.clone(), &CheckoutConfig::default());
        let checkout = CheckoutData {
            email: "buyer@example.com".into(),
            ..Default::default()
        };
        let items = vec![CartItem::new("sku-1", "Mug", 1000, 2).unwrap()];
        let order = service.create_order(&checkout, &items).await.unwrap();

        let lookup = Arc::new(lookup);
        let verifier = PaymentVerifier::new(repository, lookup.clone());
        (verifier, service, lookup, order.id)
    }

    #[tokio::test]
    async fn success_marks_paid_and_confirms() {
        let (verifier, service, _, order_id) = placed_order(FixedLookup::success(2000)).await;

        let result = verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.already_verified);

        let stored = service.get_order(order_id).await.unwrap();
        assert_eq!(stored.order.status, OrderStatus::Confirmed);
        assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
        assert_eq!(
            stored.payment.transaction_ref.as_deref(),
            Some(order_id.to_string().as_str())
        );
        assert_eq!(stored.payment.method, "card");
        assert!(stored.payment.completed_at.is_some());
    }

    #[tokio::test]
    async fn repeated_verify_is_idempotent() {
        let (verifier, service, lookup, order_id) = placed_order(FixedLookup::success(2000)).await;
        let reference = order_id.to_string();

        let first = verifier.verify(&reference, order_id).await.unwrap();
        let after_first = service.get_order(order_id).await.unwrap();
        let second = verifier.verify(&reference, order_id).await.unwrap();

        assert!(second.success && second.already_verified);
        assert_eq!(first.status, second.status);
        assert_eq!(service.get_order(order_id).await.unwrap(), after_first);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_gateway_status_changes_nothing() {
        let lookup = FixedLookup {
            status: TransactionStatus::Abandoned,
            ..FixedLookup::success(2000)
        };
        let (verifier, service, _, order_id) = placed_order(lookup).await;
        let before = service.get_order(order_id).await.unwrap();

        let err = verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::NotSuccessful { .. }));
        assert!(err.is_rejection());
        assert_eq!(service.get_order(order_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn underpayment_and_wrong_currency_are_rejected() {
        let (verifier, _, _, order_id) = placed_order(FixedLookup::success(1999)).await;
        let err = verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Underpaid {
                paid: 1999,
                expected: 2000
            }
        ));

        let lookup = FixedLookup {
            currency: "NGN",
            ..FixedLookup::success(2000)
        };
        let (verifier, _, _, order_id) = placed_order(lookup).await;
        let err = verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::CurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn reference_must_be_the_order_id() {
        let (verifier, _, lookup, order_id) = placed_order(FixedLookup::success(2000)).await;
        let err = verifier.verify("someone-else", order_id).await.unwrap_err();
        assert!(matches!(err, VerifyError::ReferenceMismatch { .. }));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);

        let missing = Uuid::new_v4();
        let err = verifier
            .verify(&missing.to_string(), missing)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::OrderNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn operator_progress_is_kept_when_payment_lands_late() {
        let (verifier, service, _, order_id) = placed_order(FixedLookup::success(2000)).await;
        service
            .update_status(order_id, "processing", StatusExtras::default())
            .await
            .unwrap();

        let result = verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap();
        assert_eq!(result.status, OrderStatus::Processing);
        assert_eq!(result.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn gateway_receipt_is_stored_with_the_payment() {
        let lookup = FixedLookup {
            receipt_number: Some("10101"),
            ..FixedLookup::success(2000)
        };
        let (verifier, service, _, order_id) = placed_order(lookup).await;

        verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap();
        let stored = service.get_order(order_id).await.unwrap();
        assert_eq!(stored.payment.receipt_url.as_deref(), Some("10101"));
    }

    #[tokio::test]
    async fn zero_amount_never_settles() {
        let (verifier, service, _, order_id) = placed_order(FixedLookup::success(0)).await;
        let err = verifier
            .verify(&order_id.to_string(), order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Underpaid { paid: 0, .. }));
        assert_eq!(
            service.get_order(order_id).await.unwrap().order.payment_status,
            PaymentStatus::Unpaid
        );
    }
}
