use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use storefront_orders::{
    app_state::AppState,
    bootstrap, config, db,
    gateway::PaystackClient,
    order_service::OrderService,
    repository::PgOrderRepository,
    routes,
    verifier::PaymentVerifier,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    tracing::info!("Bootstrapping...");
    let pool = db::create_pool(&config.database).await?;
    let repository = Arc::new(PgOrderRepository::new(pool));
    let paystack = Arc::new(PaystackClient::new(
        reqwest::Client::new(),
        &config.gateway,
    ));

    let state = AppState::new(
        OrderService::new(repository.clone(), &config.checkout),
        PaymentVerifier::new(repository, paystack),
        config.admin.api_token.as_str(),
        config.gateway.secret_key.as_str(),
    )
    .with_public_key(config.gateway.public_key.as_deref());
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    bootstrap::serve("StorefrontOrders", app, addr).await
}
