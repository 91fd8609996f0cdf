mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::{FakePaystack, Harness, checkout, two_mugs};
use storefront_orders::{
    cart::{CartItem, CartStore},
    gateway::TransactionStatus,
    order_service::OrderError,
    outbox,
    session::MemorySessionStore,
    status::{OrderStatus, PaymentStatus, StatusError, StatusExtras},
    verifier::VerifyError,
};

#[test]
fn cart_total_is_sum_of_lines() {
    let carts: Vec<Vec<(i64, u32)>> = vec![
        vec![],
        vec![(1000, 2)],
        vec![(1, 1), (250, 4), (99_999, 3)],
        vec![(0, 7), (500, 1)],
    ];

    for lines in carts {
        let cart = CartStore::new(Arc::new(MemorySessionStore::new()));
        for (index, (price, quantity)) in lines.iter().enumerate() {
            cart.add(CartItem::new(format!("sku-{index}"), "item", *price, *quantity).unwrap())
                .unwrap();
        }
        let expected: i64 = lines.iter().map(|(p, q)| p * i64::from(*q)).sum();
        assert_eq!(cart.total().unwrap(), expected);
    }
}

#[tokio::test]
async fn scenario_a_order_is_pending_and_unpaid() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(order.total_amount, 2000);
    assert_eq!(order.reference(), order.id.to_string());
}

#[tokio::test]
async fn empty_cart_never_writes() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let err = harness
        .orders
        .create_order(&checkout(), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::EmptyCart));
    assert_eq!(harness.repository.order_count().await, 0);
    assert!(harness.repository.outbox().await.is_empty());
}

#[tokio::test]
async fn scenario_c_verify_marks_paid_and_confirms_pending_order() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();
    let reference = order.reference();

    let verification = harness.verifier.verify(&reference, order.id).await.unwrap();
    assert!(verification.success);

    let stored = harness.orders.get_order(order.id).await.unwrap();
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.order.status, OrderStatus::Confirmed);
    assert_eq!(stored.payment.transaction_ref, Some(reference));
    assert_eq!(stored.payment.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn verify_many_times_equals_verify_once() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();
    let reference = order.reference();

    harness.verifier.verify(&reference, order.id).await.unwrap();
    let once = harness.orders.get_order(order.id).await.unwrap();
    let outbox_once = harness.repository.outbox().await.len();

    for _ in 0..5 {
        let again = harness.verifier.verify(&reference, order.id).await.unwrap();
        assert!(again.success);
        assert!(again.already_verified);
    }

    assert_eq!(harness.orders.get_order(order.id).await.unwrap(), once);
    assert_eq!(harness.repository.outbox().await.len(), outbox_once);
    assert_eq!(harness.repository.order_count().await, 1);
}

#[tokio::test]
async fn failed_verification_leaves_state_alone() {
    let harness = Harness::new(FakePaystack::paid(2000).with_status(TransactionStatus::Failed));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();
    let before = harness.orders.get_order(order.id).await.unwrap();

    let err = harness
        .verifier
        .verify(&order.reference(), order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::NotSuccessful { .. }));
    assert_eq!(harness.orders.get_order(order.id).await.unwrap(), before);
}

#[tokio::test]
async fn repeating_a_status_does_not_rewrite_timestamps() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();

    let processing = harness
        .orders
        .update_status(order.id, "processing", StatusExtras::default())
        .await
        .unwrap();
    let again = harness
        .orders
        .update_status(order.id, "processing", StatusExtras::default())
        .await
        .unwrap();
    assert_eq!(again, processing);

    let first_ship = Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap();
    let shipped = harness
        .orders
        .update_status(
            order.id,
            "shipped",
            StatusExtras {
                shipped_at: Some(first_ship),
                delivered_at: None,
            },
        )
        .await
        .unwrap();
    for _ in 0..3 {
        let repeat = harness
            .orders
            .update_status(order.id, "shipped", StatusExtras::default())
            .await
            .unwrap();
        assert_eq!(repeat.shipped_at, Some(first_ship));
        assert_eq!(repeat.version, shipped.version);
    }

    let delivered = harness
        .orders
        .update_status(order.id, "delivered", StatusExtras::default())
        .await
        .unwrap();
    assert_eq!(delivered.shipped_at, Some(first_ship));
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
async fn scenario_d_operator_cancels_paid_order() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();
    harness
        .verifier
        .verify(&order.reference(), order.id)
        .await
        .unwrap();

    let cancelled = harness
        .orders
        .update_status(order.id, "cancelled", StatusExtras::default())
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn terminal_orders_stay_terminal() {
    let harness = Harness::new(FakePaystack::paid(2000));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();
    let delivered = harness
        .orders
        .update_status(order.id, "delivered", StatusExtras::default())
        .await
        .unwrap();

    for target in ["pending", "shipped", "cancelled"] {
        let err = harness
            .orders
            .update_status(order.id, target, StatusExtras::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::Status(StatusError::IllegalOrderTransition { .. })
        ));
    }
    assert_eq!(
        harness.orders.get_order(order.id).await.unwrap().order,
        delivered
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_e_concurrent_verifies_apply_once() {
    let harness = Harness::new(FakePaystack::paid(2000).with_barrier(2));
    let order = harness
        .orders
        .create_order(&checkout(), &two_mugs())
        .await
        .unwrap();
    let reference = order.reference();

    let first = {
        let verifier = harness.verifier.clone();
        let reference = reference.clone();
        tokio::spawn(async move { verifier.verify(&reference, order.id).await })
    };
    let second = {
        let verifier = harness.verifier.clone();
        let reference = reference.clone();
        tokio::spawn(async move { verifier.verify(&reference, order.id).await })
    };
    let results = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

    // both saw an unsettled order before either wrote
    assert_eq!(harness.paystack.calls(), 2);
    assert!(results.iter().all(|result| result.success));
    assert_eq!(
        results
            .iter()
            .filter(|result| !result.already_verified)
            .count(),
        1
    );

    let verified_events = harness
        .repository
        .outbox()
        .await
        .iter()
        .filter(|message| message.event_type == outbox::PAYMENT_VERIFIED)
        .count();
    assert_eq!(verified_events, 1);

    let stored = harness.orders.get_order(order.id).await.unwrap();
    assert_eq!(stored.order.status, OrderStatus::Confirmed);
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.payment.transaction_ref, Some(reference));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operator_and_verifier_race_converges() {
    for _ in 0..20 {
        let harness = Harness::new(FakePaystack::paid(2000));
        let order = harness
            .orders
            .create_order(&checkout(), &two_mugs())
            .await
            .unwrap();
        let reference = order.reference();

        let verifier = harness.verifier.clone();
        let orders = harness.orders.clone();
        let verify = tokio::spawn(async move { verifier.verify(&reference, order.id).await });
        let operate = tokio::spawn(async move {
            orders
                .update_status(order.id, "processing", StatusExtras::default())
                .await
        });

        verify.await.unwrap().unwrap();
        operate.await.unwrap().unwrap();

        let stored = harness.orders.get_order(order.id).await.unwrap().order;
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }
}
