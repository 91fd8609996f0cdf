//! Storefront order service: cart and checkout session state, the order aggregate, payment
//! gateway hand-off and server-side payment verification.

pub mod app_error;
pub mod app_state;
pub mod bootstrap;
pub mod cart;
pub mod checkout;
pub mod checkout_flow;
pub mod config;
pub mod db;
pub mod gateway;
pub mod models;
pub mod order_service;
pub mod outbox;
pub mod repository;
pub mod routes;
pub mod schema;
pub mod session;
pub mod status;
pub mod verifier;
