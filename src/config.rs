//! Service configuration, read from the environment (after `.env` is loaded).

use std::str::FromStr;

use anyhow::{Context, Result, anyhow};

pub const DEFAULT_PAYSTACK_BASE_URL: &str = "https://api.paystack.co";
pub const DEFAULT_CURRENCY: &str = "KES";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub checkout: CheckoutConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub currency: String,
    /// Flat shipping fee in minor units added to every order.
    pub shipping_flat_fee: i64,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub api_token: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            shipping_flat_fee: 0,
        }
    }
}

/// Loads configuration from process environment variables.
pub fn load() -> Result<AppConfig> {
    from_lookup(|key| std::env::var(key).ok())
}

pub fn from_lookup<F>(lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| {
        lookup(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("{key} must be set"))
    };
    let parsed = |key: &str, default: &str| -> Result<String> {
        Ok(lookup(key).unwrap_or_else(|| default.to_string()))
    };

    let currency = parsed("STORE_CURRENCY", DEFAULT_CURRENCY)?.to_ascii_uppercase();
    if currency.len() != 3 {
        return Err(anyhow!("STORE_CURRENCY must be a 3-letter code, got {currency}"));
    }

    Ok(AppConfig {
        server: ServerConfig {
            host: parsed("HOST", "0.0.0.0")?,
            port: parse_number("PORT", &parsed("PORT", "3000")?)?,
        },
        database: DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: parse_number(
                "DATABASE_MAX_CONNECTIONS",
                &parsed("DATABASE_MAX_CONNECTIONS", "10")?,
            )?,
        },
        gateway: GatewayConfig {
            base_url: parsed("PAYSTACK_BASE_URL", DEFAULT_PAYSTACK_BASE_URL)?
                .trim_end_matches('/')
                .to_string(),
            secret_key: required("PAYSTACK_SECRET_KEY")?,
            public_key: lookup("PAYSTACK_PUBLIC_KEY"),
        },
        checkout: CheckoutConfig {
            currency,
            shipping_flat_fee: parse_number(
                "SHIPPING_FLAT_FEE_MINOR",
                &parsed("SHIPPING_FLAT_FEE_MINOR", "0")?,
            )?,
        },
        admin: AdminConfig {
            api_token: required("ADMIN_API_TOKEN")?,
        },
    })
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} is not a valid number: {raw}"))
}
