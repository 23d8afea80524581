//! Off-chain voucher validation and channel claiming for metered HTTP APIs.
//!
//! Consumers open an escrow channel on chain and pay per request with
//! EIP-712 signed vouchers carrying a cumulative amount and a strictly
//! increasing nonce. The service checks each voucher before serving, records
//! the charge afterwards, and periodically claims the highest voucher of each
//! channel on chain.

pub mod chain;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod utils;
pub mod validator;

pub use chain::{ChainGateway, ChainSettings, EthersGateway, InMemoryGateway, OnChainChannel};
pub use config::GatewayConfig;
pub use middleware::{admin_auth_middleware, payment_middleware, ActualCost, EstimatedCost};
pub use scheduler::ClaimScheduler;
pub use state::{ChannelLedger, ChannelState, PaymentSettings, RetentionPolicy};
pub use types::{Error, Result, Voucher, VoucherError};
pub use utils::VoucherDomain;
pub use validator::VoucherValidator;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Admin routes for ledger inspection and manual claims, behind the admin
/// bearer token.
pub fn create_admin_router(state: ChannelState) -> Router {
    Router::new()
        .route("/stats", get(handlers::stats_handler))
        .route("/channels/:id", get(handlers::channel_handler))
        .route("/claims", post(handlers::claim_handler))
        .route("/claims/expiring", post(handlers::claim_expiring_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

/// Wrap `metered` in the payment gate and mount the admin routes under
/// `/payments`.
pub fn create_router(state: ChannelState, metered: Router) -> Router {
    let gated = metered.layer(axum::middleware::from_fn_with_state(
        state.clone(),
        payment_middleware,
    ));

    Router::new()
        .nest("/payments", create_admin_router(state))
        .merge(gated)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
