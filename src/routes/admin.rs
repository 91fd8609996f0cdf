use axum::{
    Json,
    extract::{Path, Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{Order, OrderFilter},
    status::StatusExtras,
};

/// Operator routes; every request needs `Authorization: Bearer <ADMIN_API_TOKEN>`.
pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/admin",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(list_orders))
            .routes(utoipa_axum::routes!(update_status))
            .routes(utoipa_axum::routes!(update_payment_status))
            .routes(utoipa_axum::routes!(update_tracking))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                admin_authorization,
            )),
    )
}

async fn admin_authorization(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match token {
        Some(token) if !token.is_empty() && token == &*state.admin_token => {
            Ok(next.run(request).await)
        }
        _ => Err(AppError::Unauthorized),
    }
}

/// List orders, newest first.
#[utoipa::path(
    get,
    path = "/orders",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(OrderFilter),
    responses(
        (status = 200, description = "List orders", body = StdResponse<Vec<Order>, String>),
        (status = 401, description = "Missing or wrong token", body = StdResponse<String, String>)
    )
)]
async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
) -> Result<impl IntoResponse, AppError> {
    let orders = state.orders.list_orders(&filter).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("List orders successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusReq {
    pub status: String,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Move an order along its lifecycle.
///
/// Operators may skip ahead; `shipped_at`/`delivered_at` are only used if not yet recorded.
#[utoipa::path(
    patch,
    path = "/orders/{id}/status",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Status updated", body = StdResponse<Order, String>),
        (status = 400, description = "Unknown status or illegal transition", body = StdResponse<String, String>)
    )
)]
async fn update_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let extras = StatusExtras {
        shipped_at: body.shipped_at,
        delivered_at: body.delivered_at,
    };
    let order = state.orders.update_status(id, &body.status, extras).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Order status updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePaymentStatusReq {
    pub payment_status: String,
}

/// Correct an order's payment status by hand.
#[utoipa::path(
    patch,
    path = "/orders/{id}/payment-status",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to update")
    ),
    request_body = UpdatePaymentStatusReq,
    responses(
        (status = 200, description = "Payment status updated", body = StdResponse<Order, String>),
        (status = 400, description = "Unknown status or illegal transition", body = StdResponse<String, String>)
    )
)]
async fn update_payment_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<UpdatePaymentStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .update_payment_status(id, &body.payment_status)
        .await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Payment status updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateTrackingReq {
    pub tracking_number: String,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
}

/// Record the carrier's tracking number.
#[utoipa::path(
    patch,
    path = "/orders/{id}/tracking",
    tags = ["Admin"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to update")
    ),
    request_body = UpdateTrackingReq,
    responses(
        (status = 200, description = "Tracking updated", body = StdResponse<Order, String>)
    )
)]
async fn update_tracking(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<UpdateTrackingReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .update_tracking(id, &body.tracking_number, body.estimated_delivery_at)
        .await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Tracking updated successfully"),
    })
}
