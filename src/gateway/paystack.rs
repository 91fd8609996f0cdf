use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha512;

use crate::{
    config::GatewayConfig,
    gateway::{GatewayError, GatewayTransaction, TransactionLookup, TransactionStatus},
};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";
pub const CHARGE_SUCCESS: &str = "charge.success";

type HmacSha512 = Hmac<Sha512>;

/// Paystack REST client for server-side transaction verification.
#[derive(Clone)]
pub struct PaystackClient {
    http: Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackTransaction {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    channel: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    receipt_number: Option<String>,
}

impl From<PaystackTransaction> for GatewayTransaction {
    fn from(tx: PaystackTransaction) -> Self {
        Self {
            status: TransactionStatus::from(tx.status.as_str()),
            reference: tx.reference,
            amount: tx.amount,
            currency: tx.currency.to_ascii_uppercase(),
            channel: tx.channel,
            paid_at: tx.paid_at,
            receipt_number: tx.receipt_number,
        }
    }
}

/// A webhook delivery; only the fields routing needs.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub reference: String,
}

impl PaystackClient {
    pub fn new(http: Client, config: &GatewayConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }
}

#[async_trait]
impl TransactionLookup for PaystackClient {
    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let response = self
            .http
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let status = response.status();
        let body: Envelope<PaystackTransaction> = response.json().await?;
        if !status.is_success() || !body.status {
            tracing::warn!(%reference, status = status.as_u16(), message = %body.message, "Paystack verify rejected");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: body.message,
            });
        }

        body.data
            .map(GatewayTransaction::from)
            .ok_or(GatewayError::MissingData(body.message))
    }
}

/// Checks the `x-paystack-signature` header: hex HMAC-SHA512 of the raw body under the secret key.
pub fn verify_webhook_signature(secret_key: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, extract::Path, http::StatusCode, routing::get};
    use serde_json::{Value, json};

    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn fake_paystack() -> String {
        async fn verify(Path(reference): Path<String>) -> (StatusCode, Json<Value>) {
            if reference == "missing" {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "status": false, "message": "Transaction reference not found" })),
                );
            }
            (
                StatusCode::OK,
                Json(json!({
                    "status": true,
                    "message": "Verification successful",
                    "data": {
                        "reference": reference,
                        "status": "success",
                        "amount": 2000,
                        "currency": "kes",
                        "channel": "card",
                        "paid_at": "2025-03-01T10:15:23.000Z",
                        "receipt_number": null
                    }
                })),
            )
        }

        let app = Router::new().route("/transaction/verify/{reference}", get(verify));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> PaystackClient {
        PaystackClient::new(
            Client::new(),
            &GatewayConfig {
                base_url,
                secret_key: "sk_test".into(),
                public_key: None,
            },
        )
    }

    #[tokio::test]
    async fn verify_transaction_maps_paystack_payload() {
        let client = client(fake_paystack().await);
        let tx = client.verify_transaction("ref-1").await.unwrap();

        assert_eq!(tx.reference, "ref-1");
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.amount, 2000);
        assert_eq!(tx.currency, "KES");
        assert_eq!(tx.channel.as_deref(), Some("card"));
        assert!(tx.paid_at.is_some());
    }

    #[tokio::test]
    async fn unknown_reference_is_rejected() {
        let client = client(fake_paystack().await);
        let err = client.verify_transaction("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { status: 400, .. }));
    }

    #[test]
    fn webhook_signature_must_match_body_and_secret() {
        let body = br#"{"event":"charge.success","data":{"reference":"ref-1"}}"#;
        let signature = sign("sk_test", body);

        assert!(verify_webhook_signature("sk_test", body, &signature));
        assert!(!verify_webhook_signature("sk_other", body, &signature));
        assert!(!verify_webhook_signature("sk_test", b"{}", &signature));
        assert!(!verify_webhook_signature("sk_test", body, "not-hex"));
    }

    #[test]
    fn webhook_event_parses_reference() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"event":"charge.success","data":{"reference":"ref-9","amount":100}}"#,
        )
        .unwrap();
        assert_eq!(event.event, CHARGE_SUCCESS);
        assert_eq!(event.data.reference, "ref-9");
    }
}
