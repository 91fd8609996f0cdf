use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    gateway::paystack::{self, CHARGE_SUCCESS, SIGNATURE_HEADER, WebhookEvent},
    verifier::Verification,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(verify_payment))
            .routes(utoipa_axum::routes!(paystack_webhook)),
    )
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentReq {
    pub reference: String,
    pub order_id: Uuid,
}

/// Confirm a payment with the gateway and mark the order paid.
///
/// Safe to call repeatedly for the same reference.
#[utoipa::path(
    post,
    path = "/verify",
    tags = ["Payments"],
    request_body = VerifyPaymentReq,
    responses(
        (status = 200, description = "Payment verified", body = StdResponse<Verification, String>),
        (status = 422, description = "Gateway did not confirm the payment", body = StdResponse<String, String>),
        (status = 502, description = "Gateway unreachable", body = StdResponse<String, String>)
    )
)]
async fn verify_payment(
    State(state): State<AppState>,
    Json(body): Json<VerifyPaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let verification = state
        .verifier
        .verify(&body.reference, body.order_id)
        .await?;

    Ok(StdResponse {
        data: Some(verification),
        message: Some("Payment verified successfully"),
    })
}

/// Paystack webhook receiver.
///
/// `charge.success` deliveries go through the same verification as the buyer's call; other
/// events are acknowledged and ignored.
#[utoipa::path(
    post,
    path = "/webhook",
    tags = ["Payments"],
    request_body(
        content = String,
        content_type = "application/json",
        description = "Raw Paystack event, signed as delivered"
    ),
    params(
        ("x-paystack-signature" = String, Header, description = "HMAC-SHA512 of the body")
    ),
    responses(
        (status = 200, description = "Delivery accepted", body = StdResponse<String, String>),
        (status = 401, description = "Bad signature", body = StdResponse<String, String>)
    )
)]
async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if !paystack::verify_webhook_signature(&state.webhook_secret, &body, signature) {
        tracing::warn!("Rejected webhook with a bad signature");
        return Err(AppError::Unauthorized);
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("Malformed webhook body: {err}")))?;
    if event.event != CHARGE_SUCCESS {
        tracing::debug!(event = %event.event, "Ignoring webhook event");
        return Ok(Json(StdResponse::<(), _> {
            data: None,
            message: Some("Event ignored"),
        }));
    }

    let Ok(order_id) = Uuid::parse_str(event.data.reference.trim()) else {
        tracing::warn!(reference = %event.data.reference, "Webhook reference is not an order id");
        return Ok(Json(StdResponse {
            data: None,
            message: Some("Unknown reference"),
        }));
    };

    match state.verifier.verify(&event.data.reference, order_id).await {
        Ok(_) => Ok(Json(StdResponse {
            data: None,
            message: Some("Payment verified"),
        })),
        // Acknowledge rejections so the gateway stops redelivering them.
        Err(err) if err.is_rejection() => {
            tracing::warn!(%order_id, error = %err, "Webhook payment not verified");
            Ok(Json(StdResponse {
                data: None,
                message: Some("Payment not verified"),
            }))
        }
        Err(err) => Err(err.into()),
    }
}
