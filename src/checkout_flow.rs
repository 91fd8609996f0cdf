//! Buyer checkout: place the order, hand off to the payment popup, verify on success.

use thiserror::Error;
use uuid::Uuid;

use crate::{
    cart::{CartError, CartStore},
    checkout::CheckoutSession,
    gateway::{GatewayError, PaymentGatewayAdapter, PaymentOutcome, PaymentParams},
    models::Order,
    order_service::{OrderError, OrderService},
    session::SessionError,
    verifier::{PaymentVerifier, Verification, VerifyError},
};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Could not start payment: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Payment could not be verified: {0}")]
    Verification(#[from] VerifyError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayOutcome {
    /// Verified server-side; cart and checkout form have been cleared.
    Confirmed(Verification),
    /// The buyer closed the popup. The order stays pending and unpaid.
    Dismissed { order_id: Uuid },
    /// The popup went away without resolving.
    Abandoned { order_id: Uuid },
}

#[derive(Clone)]
pub struct CheckoutFlow {
    cart: CartStore,
    session: CheckoutSession,
    orders: OrderService,
    gateway: PaymentGatewayAdapter,
    verifier: PaymentVerifier,
}

impl CheckoutFlow {
    pub fn new(
        cart: CartStore,
        session: CheckoutSession,
        orders: OrderService,
        gateway: PaymentGatewayAdapter,
        verifier: PaymentVerifier,
    ) -> Self {
        Self {
            cart,
            session,
            orders,
            gateway,
            verifier,
        }
    }

    /// Creates the order for the current cart, or refreshes the one placed earlier in this
    /// session if it is still pending and unpaid.
    pub async fn place_order(&self) -> Result<Order, CheckoutError> {
        let checkout = self.session.get()?.unwrap_or_default();
        let items = self.cart.get()?;

        if let Some(order_id) = self.session.stored_order_id()? {
            match self.orders.amend_order(order_id, &checkout, &items).await {
                Ok(order) => return Ok(order),
                Err(OrderError::NotAmendable(_) | OrderError::NotFound(_)) => {
                    tracing::debug!(%order_id, "Stored order can't be reused, placing a new one");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let order = self.orders.create_order(&checkout, &items).await?;
        self.session.store_order_id(order.id)?;
        Ok(order)
    }

    /// Runs one full payment attempt.
    ///
    /// Cart and checkout form are cleared only after the gateway confirms the payment
    /// server-side; every other path leaves them for a retry.
    pub async fn pay(&self) -> Result<PayOutcome, CheckoutError> {
        let order = self.place_order().await?;
        let attempt = self.gateway.initialize(PaymentParams::for_order(&order))?;

        match attempt.outcome().await {
            Some(PaymentOutcome::Success { reference }) => {
                let verification = self.verifier.verify(&reference, order.id).await?;
                self.cart.clear()?;
                self.session.clear()?;
                tracing::info!(order_id = %order.id, "Checkout complete");
                Ok(PayOutcome::Confirmed(verification))
            }
            Some(PaymentOutcome::Cancelled) => {
                tracing::info!(order_id = %order.id, "Payment popup closed");
                Ok(PayOutcome::Dismissed { order_id: order.id })
            }
            None => {
                tracing::info!(order_id = %order.id, "Payment popup abandoned");
                Ok(PayOutcome::Abandoned { order_id: order.id })
            }
        }
    }
}
