use crate::types::Channel;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ethers::types::{Address, H256, U256};
use serde_json::json;
use thiserror::Error;

/// Why a voucher was refused.
///
/// These are expected business outcomes, returned as values rather than
/// raised: the HTTP layer turns them into payment errors for the caller.
#[derive(Error, Debug)]
pub enum VoucherError {
    #[error("No payment voucher supplied")]
    Missing,
    #[error("Invalid voucher format: {0}")]
    InvalidFormat(String),
    #[error("Channel {0:#x} not found")]
    ChannelNotFound(H256),
    #[error("Channel belongs to provider {actual:#x}, not {expected:#x}")]
    WrongProvider { expected: Address, actual: Address },
    #[error("Insufficient funds: voucher authorizes {authorized}, at least {expected} required")]
    InsufficientFunds {
        expected: U256,
        authorized: U256,
        channel: Box<Channel>,
    },
    #[error("Voucher amount {amount} exceeds channel deposit {deposit}")]
    ExceedsDeposit { amount: U256, deposit: U256 },
    #[error("Invalid nonce {received}: must be greater than {last}")]
    InvalidNonce { received: U256, last: U256 },
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Validation error: {0}")]
    Validation(String),
}

impl VoucherError {
    /// Stable machine-readable code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            VoucherError::Missing => "payment_required",
            VoucherError::InvalidFormat(_) => "invalid_voucher_format",
            VoucherError::ChannelNotFound(_) => "channel_not_found",
            VoucherError::WrongProvider { .. } => "wrong_provider",
            VoucherError::InsufficientFunds { .. } => "insufficient_funds",
            VoucherError::ExceedsDeposit { .. } => "exceeds_deposit",
            VoucherError::InvalidNonce { .. } => "invalid_nonce",
            VoucherError::InvalidSignature => "invalid_signature",
            VoucherError::Validation(_) => "validation_error",
        }
    }

    /// The channel snapshot attached to the rejection, if any.
    pub fn channel(&self) -> Option<&Channel> {
        match self {
            VoucherError::InsufficientFunds { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

impl From<LedgerError> for VoucherError {
    fn from(error: LedgerError) -> Self {
        VoucherError::Validation(error.to_string())
    }
}

impl From<&VoucherError> for StatusCode {
    fn from(error: &VoucherError) -> Self {
        match error {
            VoucherError::Missing
            | VoucherError::InsufficientFunds { .. }
            | VoucherError::ExceedsDeposit { .. }
            | VoucherError::InvalidNonce { .. } => StatusCode::PAYMENT_REQUIRED,
            VoucherError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            VoucherError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            VoucherError::WrongProvider { .. } => StatusCode::FORBIDDEN,
            VoucherError::InvalidSignature => StatusCode::UNAUTHORIZED,
            VoucherError::Validation(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for VoucherError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Some(channel) = self.channel() {
            body["channelId"] = json!(format!("{:#x}", channel.channel_id));
            body["totalCharged"] = json!(channel.total_charged.to_string());
            body["deposit"] = json!(channel.deposit.to_string());
            body["remaining"] = json!(channel.remaining().to_string());
        }
        (status, Json(body)).into_response()
    }
}

/// Failures talking to the settlement contract.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Chain read failed: {0}")]
    Read(String),
    #[error("Claim submission failed: {0}")]
    Claim(String),
    #[error("Claim transaction {0:#x} reverted")]
    Reverted(H256),
    #[error("Gateway configuration error: {0}")]
    Config(String),
}

/// Failures loading or persisting the channel ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Ledger encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Crate-level error for setup and bootstrap paths.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type Result<T> = std::result::Result<T, Error>;
