use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cart::CartItem,
    checkout::CheckoutData,
    gateway::PaymentParams,
    models::{Order, OrderAggregate},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(place_order))
        .routes(utoipa_axum::routes!(get_order))
        .routes(utoipa_axum::routes!(cancel_order))
}

#[derive(Deserialize, ToSchema)]
pub struct PlaceOrderReq {
    pub checkout: CheckoutData,
    pub items: Vec<CartItem>,
}

#[derive(Serialize, ToSchema)]
pub struct PlaceOrderRes {
    pub order_id: Uuid,
    pub order_number: String,
    pub total_amount: i64,
    pub currency: String,
    /// Parameters to open the payment popup with.
    pub payment: PaymentParams,
    pub public_key: Option<String>,
}

/// Place an order from a checkout form and cart.
#[utoipa::path(
    post,
    path = "/orders",
    tags = ["Orders"],
    request_body = PlaceOrderReq,
    responses(
        (status = 201, description = "Order placed", body = StdResponse<PlaceOrderRes, String>),
        (status = 400, description = "Empty cart or missing checkout field", body = StdResponse<String, String>)
    )
)]
async fn place_order(
    State(state): State<AppState>,
    Json(body): Json<PlaceOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .create_order(&body.checkout, &body.items)
        .await?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(PlaceOrderRes {
                payment: PaymentParams::for_order(&order),
                order_id: order.id,
                order_number: order.order_number,
                total_amount: order.total_amount,
                currency: order.currency,
                public_key: state.public_key.as_deref().map(str::to_string),
            }),
            message: Some("Order placed successfully"),
        },
    ))
}

/// Fetch an order with its items and payment record.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderAggregate, String>),
        (status = 404, description = "No such order", body = StdResponse<String, String>)
    )
)]
async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.orders.get_order(id).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Get order successfully"),
    })
}

#[derive(Deserialize, Default, ToSchema)]
pub struct CancelOrderReq {
    pub reason: Option<String>,
}

/// Cancel an order at the buyer's request.
#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID to cancel")
    ),
    request_body = CancelOrderReq,
    responses(
        (status = 200, description = "Order cancelled", body = StdResponse<Order, String>),
        (status = 400, description = "Order can no longer be cancelled", body = StdResponse<String, String>)
    )
)]
async fn cancel_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<CancelOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .cancel_order(id, body.reason.as_deref())
        .await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Order cancelled successfully"),
    })
}
