use crate::chain::ChainGateway;
use crate::scheduler::ClaimScheduler;
use crate::state::{ChannelLedger, ChannelLocks};
use crate::types::{wire::u256_dec, Channel, VoucherError};
use crate::validator::VoucherValidator;
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Everything the payment path needs, built once at startup and shared by
/// the HTTP layer and the claim scheduler.
#[derive(Clone)]
pub struct ChannelState {
    pub ledger: Arc<ChannelLedger>,
    pub validator: Arc<VoucherValidator>,
    pub scheduler: Arc<ClaimScheduler>,
    gateway: Arc<dyn ChainGateway>,
    settings: PaymentSettings,
    admin_token: Option<Arc<str>>,
}

/// Deployment-level knobs for the payment path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaymentSettings {
    /// This service's address; channels naming another provider are refused.
    pub provider: Address,
    pub claim_threshold: U256,
    pub min_request_cost: U256,
    pub expiry_buffer_secs: u64,
    /// Longest a claim may hold its channel lock.
    pub claim_timeout: Duration,
}

/// Local and on-chain view of one channel.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub channel_id: H256,
    pub local: Option<Channel>,
    #[serde(with = "u256_dec")]
    pub on_chain_balance: U256,
    #[serde(with = "u256_dec")]
    pub unclaimed_amount: U256,
}

impl ChannelState {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        ledger: Arc<ChannelLedger>,
        settings: PaymentSettings,
    ) -> Self {
        let locks = ChannelLocks::new();
        let validator = Arc::new(VoucherValidator::new(
            gateway.clone(),
            ledger.clone(),
            locks.clone(),
            settings.provider,
        ));
        let scheduler = Arc::new(ClaimScheduler::new(
            ledger.clone(),
            gateway.clone(),
            locks,
            settings.claim_threshold,
            settings.claim_timeout,
        ));

        Self {
            ledger,
            validator,
            scheduler,
            gateway,
            settings,
            admin_token: None,
        }
    }

    /// Bearer token the admin routes require. Blank tokens count as unset.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token
            .filter(|t| !t.trim().is_empty())
            .map(Arc::from);
        self
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    /// Estimate used for pre-call validation when the caller supplies none.
    pub fn min_request_cost(&self) -> U256 {
        self.settings.min_request_cost
    }

    pub fn expiry_buffer_secs(&self) -> u64 {
        self.settings.expiry_buffer_secs
    }

    pub async fn channel_status(&self, channel_id: H256) -> Result<ChannelStatus, VoucherError> {
        let on_chain_balance = self
            .gateway
            .get_balance(channel_id)
            .await
            .map_err(|e| VoucherError::Validation(e.to_string()))?;
        let local = self.ledger.get_channel(channel_id);
        let unclaimed_amount = self
            .ledger
            .highest_unclaimed(channel_id)
            .map(|v| v.voucher.amount)
            .unwrap_or_default();

        if local.is_none() && on_chain_balance.is_zero() {
            return Err(VoucherError::ChannelNotFound(channel_id));
        }

        Ok(ChannelStatus {
            channel_id,
            local,
            on_chain_balance,
            unclaimed_amount,
        })
    }
}
