use crate::state::{ChannelState, ChannelStatus};
use crate::types::{LedgerStats, VoucherError};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Default, Deserialize)]
pub struct ClaimParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExpiringParams {
    pub buffer: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub transactions: Vec<H256>,
}

pub async fn stats_handler(State(state): State<ChannelState>) -> Json<LedgerStats> {
    Json(state.ledger.stats())
}

pub async fn channel_handler(
    State(state): State<ChannelState>,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelStatus>, VoucherError> {
    let channel_id = H256::from_str(&channel_id)
        .map_err(|e| VoucherError::InvalidFormat(format!("channelId: {e}")))?;
    Ok(Json(state.channel_status(channel_id).await?))
}

pub async fn claim_handler(
    State(state): State<ChannelState>,
    Query(params): Query<ClaimParams>,
) -> Json<ClaimResponse> {
    Json(ClaimResponse {
        transactions: state.scheduler.claim_due(params.force).await,
    })
}

pub async fn claim_expiring_handler(
    State(state): State<ChannelState>,
    Query(params): Query<ExpiringParams>,
) -> Json<ClaimResponse> {
    let buffer = params.buffer.unwrap_or(state.expiry_buffer_secs());
    Json(ClaimResponse {
        transactions: state.scheduler.claim_expiring(buffer).await,
    })
}
