use std::sync::Arc;

use crate::{order_service::OrderService, verifier::PaymentVerifier};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub verifier: PaymentVerifier,
    /// Bearer token the admin routes require.
    pub admin_token: Arc<str>,
    /// Paystack secret key; also signs webhook deliveries.
    pub webhook_secret: Arc<str>,
    /// Paystack public key handed to the buyer's popup.
    pub public_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        orders: OrderService,
        verifier: PaymentVerifier,
        admin_token: impl Into<Arc<str>>,
        webhook_secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            orders,
            verifier,
            admin_token: admin_token.into(),
            webhook_secret: webhook_secret.into(),
            public_key: None,
        }
    }

    pub fn with_public_key(mut self, public_key: Option<&str>) -> Self {
        self.public_key = public_key.map(Arc::from);
        self
    }
}
