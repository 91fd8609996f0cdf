#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use storefront_orders::{
    cart::CartItem,
    checkout::CheckoutData,
    config::CheckoutConfig,
    gateway::{
        ChannelPopup, GatewayError, GatewayTransaction, PaymentGatewayAdapter, PaymentParams,
        TransactionLookup, TransactionStatus,
    },
    order_service::OrderService,
    repository::InMemoryOrderRepository,
    verifier::PaymentVerifier,
};
use tokio::sync::Barrier;

/// Stand-in for the Paystack verify endpoint.
pub struct FakePaystack {
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    calls: AtomicUsize,
    barrier: Option<Barrier>,
}

impl FakePaystack {
    pub fn paid(amount: i64) -> Self {
        Self {
            status: TransactionStatus::Success,
            amount,
            currency: "KES".into(),
            calls: AtomicUsize::new(0),
            barrier: None,
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Holds every lookup until `callers` lookups are in flight.
    pub fn with_barrier(mut self, callers: usize) -> Self {
        self.barrier = Some(Barrier::new(callers));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionLookup for FakePaystack {
    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        Ok(GatewayTransaction {
            reference: reference.to_string(),
            status: self.status.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            channel: Some("card".into()),
            paid_at: None,
            receipt_number: None,
        })
    }
}

pub struct Harness {
    pub repository: Arc<InMemoryOrderRepository>,
    pub orders: OrderService,
    pub verifier: PaymentVerifier,
    pub paystack: Arc<FakePaystack>,
}

impl Harness {
    pub fn new(paystack: FakePaystack) -> Self {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let paystack = Arc::new(paystack);
        Self {
            orders: OrderService::new(repository.clone(), &CheckoutConfig::default()),
            verifier: PaymentVerifier::new(repository.clone(), paystack.clone()),
            repository,
            paystack,
        }
    }
}

pub fn checkout() -> CheckoutData {
    CheckoutData {
        email: "buyer@example.com".into(),
        phone: "0700000000".into(),
        ..Default::default()
    }
}

pub fn two_mugs() -> Vec<CartItem> {
    vec![CartItem::new("sku-mug", "Mug", 1000, 2).unwrap()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    Succeed,
    Close,
    TearDown,
}

/// Plays the buyer's side of the payment popup, one scripted action per opened popup.
pub struct ScriptedPopup {
    pub opened: Arc<Mutex<Vec<PaymentParams>>>,
}

impl ScriptedPopup {
    pub fn spawn(actions: &[PopupAction]) -> (PaymentGatewayAdapter, Self) {
        let (popup, mut requests) = ChannelPopup::new();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let mut script: VecDeque<PopupAction> = actions.iter().copied().collect();

        let seen = opened.clone();
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                seen.lock().push(request.params.clone());
                match script.pop_front().unwrap_or(PopupAction::Close) {
                    PopupAction::Succeed => {
                        let reference = request.completion.reference().to_string();
                        request.completion.succeed(reference);
                    }
                    PopupAction::Close => request.completion.close(),
                    PopupAction::TearDown => drop(request.completion),
                }
            }
        });

        (PaymentGatewayAdapter::new(Arc::new(popup)), Self { opened })
    }

    pub fn opened(&self) -> Vec<PaymentParams> {
        self.opened.lock().clone()
    }
}
