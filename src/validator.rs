//! Voucher acceptance and charge commitment.
//!
//! A metered request is checked twice: once before the backend call with a
//! lower-bound estimate, and again with the measured cost before the charge
//! is committed. Only that second check may lead to [`VoucherValidator::store_voucher`],
//! and [`VoucherValidator::settle`] does both under one channel lock.

use crate::chain::{ChainGateway, OnChainChannel};
use crate::state::{ChannelLedger, ChannelLocks};
use crate::types::{Channel, PaymentReceipt, StoredVoucher, Voucher, VoucherError};
use crate::utils::unix_now;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An accepted voucher and the channel it was checked against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    pub channel: Channel,
    /// The voucher's cumulative ceiling. Nothing is committed yet.
    pub new_total: U256,
}

pub struct VoucherValidator {
    gateway: Arc<dyn ChainGateway>,
    ledger: Arc<ChannelLedger>,
    locks: ChannelLocks,
    provider: Address,
}

impl VoucherValidator {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        ledger: Arc<ChannelLedger>,
        locks: ChannelLocks,
        provider: Address,
    ) -> Self {
        Self {
            gateway,
            ledger,
            locks,
            provider,
        }
    }

    pub fn provider(&self) -> Address {
        self.provider
    }

    /// Decide whether `voucher` covers `required` on top of what the channel
    /// has already been charged.
    pub async fn validate(
        &self,
        voucher: &Voucher,
        required: U256,
    ) -> Result<Validation, VoucherError> {
        let _guard = self.locks.acquire(voucher.channel_id).await;
        self.validate_locked(voucher, required).await
    }

    /// Commit `cost` against the channel after a successful post-call validation.
    pub async fn store_voucher(
        &self,
        voucher: &Voucher,
        snapshot: &Channel,
        cost: U256,
    ) -> Result<PaymentReceipt, VoucherError> {
        let _guard = self.locks.acquire(voucher.channel_id).await;
        self.store_locked(voucher, snapshot, cost)
    }

    /// Post-call validation with the actual cost, then commit, atomically per channel.
    pub async fn settle(
        &self,
        voucher: &Voucher,
        actual_cost: U256,
    ) -> Result<PaymentReceipt, VoucherError> {
        let _guard = self.locks.acquire(voucher.channel_id).await;
        let validation = self.validate_locked(voucher, actual_cost).await?;
        self.store_locked(voucher, &validation.channel, actual_cost)
    }

    async fn validate_locked(
        &self,
        voucher: &Voucher,
        required: U256,
    ) -> Result<Validation, VoucherError> {
        let channel_id = voucher.channel_id;

        let on_chain = self.gateway.get_channel(channel_id).await.map_err(|e| {
            warn!(?channel_id, error = %e, "Channel read failed");
            VoucherError::Validation(e.to_string())
        })?;

        if !on_chain.exists() {
            return Err(VoucherError::ChannelNotFound(channel_id));
        }
        if on_chain.provider != self.provider {
            return Err(VoucherError::WrongProvider {
                expected: self.provider,
                actual: on_chain.provider,
            });
        }

        let (channel, first_seen) = self.load_or_create(channel_id, &on_chain)?;

        let expected = channel.total_charged.saturating_add(required);
        if voucher.amount < expected {
            debug!(?channel_id, %expected, authorized = %voucher.amount, "Voucher does not cover request");
            return Err(VoucherError::InsufficientFunds {
                expected,
                authorized: voucher.amount,
                channel: Box::new(channel),
            });
        }

        if voucher.amount > channel.deposit {
            return Err(VoucherError::ExceedsDeposit {
                amount: voucher.amount,
                deposit: channel.deposit,
            });
        }

        if let Some(last) = channel.last_nonce() {
            if voucher.nonce <= last {
                return Err(VoucherError::InvalidNonce {
                    received: voucher.nonce,
                    last,
                });
            }
        }

        if !self.gateway.verify_voucher(voucher, channel.consumer) {
            warn!(?channel_id, consumer = ?channel.consumer, "Voucher signature mismatch");
            return Err(VoucherError::InvalidSignature);
        }

        if first_seen {
            self.ledger.upsert_channel(channel.clone())?;
            info!(
                ?channel_id,
                consumer = ?channel.consumer,
                deposit = %channel.deposit,
                expiry = ?channel.expiry,
                "Tracking new channel"
            );
        }

        Ok(Validation {
            new_total: voucher.amount,
            channel,
        })
    }

    /// Local record for the channel, or a fresh one that is not yet persisted.
    fn load_or_create(
        &self,
        channel_id: H256,
        on_chain: &OnChainChannel,
    ) -> Result<(Channel, bool), VoucherError> {
        match self.ledger.get_channel(channel_id) {
            Some(mut channel) => {
                if channel.expiry.is_none() {
                    channel.expiry = Some(on_chain.expiry);
                    self.ledger.upsert_channel(channel.clone())?;
                    info!(?channel_id, expiry = on_chain.expiry, "Backfilled channel expiry");
                }
                Ok((channel, false))
            }
            None => Ok((Channel::open(channel_id, on_chain, unix_now()), true)),
        }
    }

    fn store_locked(
        &self,
        voucher: &Voucher,
        snapshot: &Channel,
        cost: U256,
    ) -> Result<PaymentReceipt, VoucherError> {
        let mut channel = self
            .ledger
            .get_channel(voucher.channel_id)
            .unwrap_or_else(|| snapshot.clone());

        if let Some(last) = channel.last_nonce() {
            if voucher.nonce <= last {
                return Err(VoucherError::InvalidNonce {
                    received: voucher.nonce,
                    last,
                });
            }
        }

        let new_total = channel
            .total_charged
            .checked_add(cost)
            .ok_or_else(|| VoucherError::Validation("charge overflows uint256".to_string()))?;
        if new_total > voucher.amount {
            return Err(VoucherError::InsufficientFunds {
                expected: new_total,
                authorized: voucher.amount,
                channel: Box::new(channel),
            });
        }
        if new_total > channel.deposit {
            return Err(VoucherError::ExceedsDeposit {
                amount: new_total,
                deposit: channel.deposit,
            });
        }

        let now = unix_now();
        channel.total_charged = new_total;
        channel.last_voucher = Some(voucher.clone());
        channel.last_activity_at = now;

        let stored = StoredVoucher::received(voucher.clone(), channel.consumer, now);
        self.ledger.commit(channel.clone(), stored)?;

        debug!(
            channel_id = ?channel.channel_id,
            %cost,
            total = %channel.total_charged,
            nonce = %voucher.nonce,
            "Charge committed"
        );

        Ok(PaymentReceipt {
            channel_id: channel.channel_id,
            cost,
            total: channel.total_charged,
            remaining: channel.remaining(),
        })
    }
}
