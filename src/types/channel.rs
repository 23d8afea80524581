use crate::chain::OnChainChannel;
use crate::types::wire::{signature_hex, u256_dec};
use axum::http::{HeaderMap, HeaderValue};
use ethers::types::{Address, Signature, H256, U256};
use serde::{Deserialize, Serialize};

/// A consumer-signed authorization of cumulative spend on a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub channel_id: H256,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    #[serde(with = "u256_dec")]
    pub nonce: U256,
    #[serde(with = "signature_hex")]
    pub signature: Signature,
}

/// A voucher as kept by the ledger until it is claimed on-chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVoucher {
    #[serde(flatten)]
    pub voucher: Voucher,
    pub consumer: Address,
    pub received_at: u64,
    pub claimed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_tx_hash: Option<H256>,
}

impl StoredVoucher {
    pub fn received(voucher: Voucher, consumer: Address, received_at: u64) -> Self {
        Self {
            voucher,
            consumer,
            received_at,
            claimed: false,
            claimed_at: None,
            claim_tx_hash: None,
        }
    }

    pub fn channel_id(&self) -> H256 {
        self.voucher.channel_id
    }

    /// Ordering used to pick the claim candidate: amount first, nonce breaks ties.
    pub fn outranks(&self, other: &StoredVoucher) -> bool {
        (self.voucher.amount, self.voucher.nonce) > (other.voucher.amount, other.voucher.nonce)
    }
}

/// Local mirror of an escrow channel plus its running consumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_id: H256,
    pub consumer: Address,
    pub provider: Address,
    #[serde(with = "u256_dec")]
    pub deposit: U256,
    #[serde(with = "u256_dec")]
    pub total_charged: U256,
    /// Unix seconds. `None` only for records written before expiry was tracked.
    #[serde(default)]
    pub expiry: Option<u64>,
    #[serde(default)]
    pub last_voucher: Option<Voucher>,
    pub created_at: u64,
    pub last_activity_at: u64,
}

impl Channel {
    /// First local sighting of a channel, seeded from the contract.
    pub fn open(channel_id: H256, on_chain: &OnChainChannel, now: u64) -> Self {
        Self {
            channel_id,
            consumer: on_chain.consumer,
            provider: on_chain.provider,
            deposit: on_chain.deposit,
            total_charged: U256::zero(),
            expiry: Some(on_chain.expiry),
            last_voucher: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn remaining(&self) -> U256 {
        self.deposit.saturating_sub(self.total_charged)
    }

    pub fn last_nonce(&self) -> Option<U256> {
        self.last_voucher.as_ref().map(|v| v.nonce)
    }
}

/// Metadata handed back to the caller after a charge is committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub channel_id: H256,
    #[serde(with = "u256_dec")]
    pub cost: U256,
    #[serde(with = "u256_dec")]
    pub total: U256,
    #[serde(with = "u256_dec")]
    pub remaining: U256,
}

pub const COST_HEADER: &str = "x-payment-cost";
pub const TOTAL_HEADER: &str = "x-payment-total";
pub const REMAINING_HEADER: &str = "x-payment-remaining";
pub const CHANNEL_HEADER: &str = "x-payment-channel";

impl PaymentReceipt {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let values = [
            (COST_HEADER, self.cost.to_string()),
            (TOTAL_HEADER, self.total.to_string()),
            (REMAINING_HEADER, self.remaining.to_string()),
            (CHANNEL_HEADER, format!("{:#x}", self.channel_id)),
        ];
        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }
}

/// Aggregate view of the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_vouchers: usize,
    pub unclaimed_count: usize,
    pub active_channels: usize,
    #[serde(with = "u256_dec")]
    pub total_earned: U256,
}
