use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{order_service::OrderError, status::StatusError, verifier::VerifyError};

/// Envelope for every JSON body this service returns.
#[derive(Debug, Serialize, ToSchema)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Missing or invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0} is unreachable")]
    ServiceUnreachable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
            match &self {
                AppError::ServiceUnreachable(_) => self.to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        let body: StdResponse<(), String> = StdResponse {
            data: None,
            message: Some(message),
        };
        (status, body).into_response()
    }
}

impl From<StatusError> for AppError {
    fn from(err: StatusError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::EmptyCart | OrderError::Validation { .. } => {
                AppError::BadRequest(err.to_string())
            }
            OrderError::NotFound(_) => AppError::NotFound,
            OrderError::Status(err) => err.into(),
            OrderError::NotAmendable(_) | OrderError::Contention(_) => {
                AppError::Conflict(err.to_string())
            }
            OrderError::Outbox(_) | OrderError::Persistence(_) => AppError::Other(err.into()),
        }
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::OrderNotFound(_) => AppError::NotFound,
            VerifyError::Contention(_) => AppError::Conflict(err.to_string()),
            VerifyError::Gateway(ref gateway) if !err.is_rejection() => {
                AppError::ServiceUnreachable(format!("Payment gateway ({gateway})"))
            }
            err if err.is_rejection() => AppError::Unprocessable(err.to_string()),
            err => AppError::Other(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::status::OrderStatus;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (OrderError::EmptyCart.into(), StatusCode::BAD_REQUEST),
            (
                OrderError::NotFound(Uuid::nil()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                OrderError::Status(StatusError::IllegalOrderTransition {
                    from: OrderStatus::Delivered,
                    to: OrderStatus::Pending,
                })
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrderError::NotAmendable(Uuid::nil()).into(),
                StatusCode::CONFLICT,
            ),
            (
                VerifyError::Underpaid {
                    paid: 1,
                    expected: 2,
                }
                .into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                VerifyError::Gateway(crate::gateway::GatewayError::MissingData("x".into())).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }
}
