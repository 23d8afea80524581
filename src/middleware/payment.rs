use crate::{
    state::ChannelState,
    types::{parse_voucher, Voucher, VoucherError, VOUCHER_HEADER},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ethers::types::U256;
use tracing::{debug, warn};

/// Lower-bound cost of the request, attached as a request extension by
/// whatever layer knows how to price it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EstimatedCost(pub U256);

/// Measured cost of the request, attached as a response extension by the
/// metered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActualCost(pub U256);

fn extract_voucher(request: &Request) -> Result<Voucher, VoucherError> {
    let raw = request
        .headers()
        .get(VOUCHER_HEADER)
        .ok_or(VoucherError::Missing)?
        .to_str()
        .map_err(|_| VoucherError::InvalidFormat("header is not visible ASCII".to_string()))?;
    parse_voucher(raw)
}

/// Gate a route on a payment voucher.
///
/// Pre-authorizes against the estimate, runs the inner service, then settles
/// the measured cost. Unsuccessful inner responses are passed through
/// uncharged.
pub async fn payment_middleware(
    State(state): State<ChannelState>,
    request: Request,
    next: Next,
) -> Response {
    let voucher = match extract_voucher(&request) {
        Ok(voucher) => voucher,
        Err(e) => return e.into_response(),
    };

    let estimate = request
        .extensions()
        .get::<EstimatedCost>()
        .map(|c| c.0)
        .unwrap_or_else(|| state.min_request_cost());

    if let Err(e) = state.validator.validate(&voucher, estimate).await {
        debug!(channel_id = ?voucher.channel_id, code = e.code(), "Pre-authorization rejected");
        return e.into_response();
    }

    let mut response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let actual = response
        .extensions()
        .get::<ActualCost>()
        .map(|c| c.0)
        .unwrap_or(estimate);

    match state.validator.settle(&voucher, actual).await {
        Ok(receipt) => {
            receipt.apply_headers(response.headers_mut());
            response
        }
        Err(e) => {
            warn!(
                channel_id = ?voucher.channel_id,
                %estimate,
                %actual,
                code = e.code(),
                "Post-authorization rejected, request not charged"
            );
            e.into_response()
        }
    }
}
