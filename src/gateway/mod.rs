//! Payment gateway hand-off.
//!
//! [`PaymentGatewayAdapter::initialize`] opens the hosted payment popup and returns at once with a
//! [`PaymentAttempt`]. The popup side holds the matching [`PaymentCompletion`] and resolves it
//! exactly once, either with a success carrying the gateway reference or with a close. Server-side
//! confirmation goes through [`TransactionLookup`] instead; the popup outcome alone never marks an
//! order paid.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use utoipa::ToSchema;

use crate::models::Order;

pub mod paystack;

pub use paystack::PaystackClient;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid payment parameters: {0}")]
    InvalidParams(&'static str),

    #[error("Payment popup is unavailable")]
    PopupUnavailable,

    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Gateway returned no transaction data: {0}")]
    MissingData(String),
}

/// Parameters handed to the payment popup. `amount_minor_units` is in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentParams {
    pub email: String,
    pub amount_minor_units: i64,
    pub currency: String,
    /// Always the order id.
    pub reference: String,
}

impl PaymentParams {
    pub fn for_order(order: &Order) -> Self {
        Self {
            email: order.email.clone(),
            amount_minor_units: order.total_amount,
            currency: order.currency.clone(),
            reference: order.reference(),
        }
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.email.trim().is_empty() {
            return Err(GatewayError::InvalidParams("email is blank"));
        }
        if self.reference.trim().is_empty() {
            return Err(GatewayError::InvalidParams("reference is blank"));
        }
        if self.amount_minor_units <= 0 {
            return Err(GatewayError::InvalidParams("amount must be positive"));
        }
        if self.currency.trim().len() != 3 {
            return Err(GatewayError::InvalidParams("currency must be a 3-letter code"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success { reference: String },
    Cancelled,
}

/// Buyer-side handle on an opened popup.
#[derive(Debug)]
pub struct PaymentAttempt {
    reference: String,
    receiver: oneshot::Receiver<PaymentOutcome>,
}

impl PaymentAttempt {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Waits for the popup to resolve. `None` means it was torn down without resolving.
    pub async fn outcome(self) -> Option<PaymentOutcome> {
        self.receiver.await.ok()
    }
}

/// Popup-side handle. Consumed by whichever outcome fires first.
#[derive(Debug)]
pub struct PaymentCompletion {
    reference: String,
    sender: oneshot::Sender<PaymentOutcome>,
}

impl PaymentCompletion {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn succeed(self, reference: impl Into<String>) {
        let outcome = PaymentOutcome::Success {
            reference: reference.into(),
        };
        if self.sender.send(outcome).is_err() {
            tracing::debug!(reference = %self.reference, "Payment attempt dropped before success");
        }
    }

    pub fn close(self) {
        if self.sender.send(PaymentOutcome::Cancelled).is_err() {
            tracing::debug!(reference = %self.reference, "Payment attempt dropped before close");
        }
    }
}

/// Creates the two ends of one payment attempt.
pub fn payment_channel(reference: impl Into<String>) -> (PaymentCompletion, PaymentAttempt) {
    let reference = reference.into();
    let (sender, receiver) = oneshot::channel();
    (
        PaymentCompletion {
            reference: reference.clone(),
            sender,
        },
        PaymentAttempt {
            reference,
            receiver,
        },
    )
}

/// Surface that shows the hosted payment UI.
pub trait PaymentPopup: Send + Sync {
    fn open(&self, params: PaymentParams, completion: PaymentCompletion)
    -> Result<(), GatewayError>;
}

/// A popup setup request as seen by the host driving the UI.
#[derive(Debug)]
pub struct PopupRequest {
    pub params: PaymentParams,
    pub completion: PaymentCompletion,
}

/// Forwards popup requests over a channel to whatever drives the UI.
#[derive(Debug, Clone)]
pub struct ChannelPopup {
    sender: mpsc::UnboundedSender<PopupRequest>,
}

impl ChannelPopup {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PopupRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PaymentPopup for ChannelPopup {
    fn open(
        &self,
        params: PaymentParams,
        completion: PaymentCompletion,
    ) -> Result<(), GatewayError> {
        self.sender
            .send(PopupRequest { params, completion })
            .map_err(|_| GatewayError::PopupUnavailable)
    }
}

#[derive(Clone)]
pub struct PaymentGatewayAdapter {
    popup: Arc<dyn PaymentPopup>,
}

impl PaymentGatewayAdapter {
    pub fn new(popup: Arc<dyn PaymentPopup>) -> Self {
        Self { popup }
    }

    /// Opens the popup and returns without waiting for the buyer.
    pub fn initialize(&self, params: PaymentParams) -> Result<PaymentAttempt, GatewayError> {
        params.validate()?;
        let (completion, attempt) = payment_channel(params.reference.clone());
        tracing::info!(
            reference = %params.reference,
            amount = params.amount_minor_units,
            currency = %params.currency,
            "Opening payment popup"
        );
        self.popup.open(params, completion)?;
        Ok(attempt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Success,
    Failed,
    Abandoned,
    Pending,
    Other(String),
}

impl From<&str> for TransactionStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => TransactionStatus::Success,
            "failed" => TransactionStatus::Failed,
            "abandoned" => TransactionStatus::Abandoned,
            "pending" | "ongoing" | "processing" | "queued" => TransactionStatus::Pending,
            other => TransactionStatus::Other(other.to_string()),
        }
    }
}

/// The gateway's authoritative view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTransaction {
    pub reference: String,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub channel: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub receipt_number: Option<String>,
}

#[async_trait]
pub trait TransactionLookup: Send + Sync {
    async fn verify_transaction(&self, reference: &str)
    -> Result<GatewayTransaction, GatewayError>;
}
