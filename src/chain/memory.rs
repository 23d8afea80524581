//! In-process stand-in for the escrow contract.
//!
//! Holds a channel table, records claims, and can be told to fail reads or
//! claims so callers can exercise error paths without a node.

use crate::chain::{ChainGateway, OnChainChannel};
use crate::types::{GatewayError, Voucher};
use crate::utils::VoucherDomain;
use async_trait::async_trait;
use ethers::{
    types::{Address, Signature, H256, U256},
    utils::keccak256,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};

/// A claim the in-memory contract accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRecord {
    pub channel_id: H256,
    pub amount: U256,
    pub nonce: U256,
    pub tx_hash: H256,
}

pub struct InMemoryGateway {
    domain: VoucherDomain,
    channels: RwLock<HashMap<H256, OnChainChannel>>,
    claims: Mutex<Vec<ClaimRecord>>,
    failing_claims: RwLock<HashSet<H256>>,
    hanging_claims: RwLock<HashSet<H256>>,
    read_failure: RwLock<Option<String>>,
}

impl InMemoryGateway {
    pub fn new(domain: VoucherDomain) -> Self {
        Self {
            domain,
            channels: RwLock::new(HashMap::new()),
            claims: Mutex::new(Vec::new()),
            failing_claims: RwLock::new(HashSet::new()),
            hanging_claims: RwLock::new(HashSet::new()),
            read_failure: RwLock::new(None),
        }
    }

    /// Register (or overwrite) a channel as the contract would after `open`.
    pub fn open_channel(
        &self,
        channel_id: H256,
        consumer: Address,
        provider: Address,
        deposit: U256,
        expiry: u64,
    ) {
        self.channels.write().insert(
            channel_id,
            OnChainChannel {
                consumer,
                provider,
                deposit,
                claimed: false,
                expiry,
            },
        );
    }

    /// Make every claim on `channel_id` revert until cleared.
    pub fn fail_claims_for(&self, channel_id: H256) {
        self.failing_claims.write().insert(channel_id);
    }

    /// Make every claim on `channel_id` stay pending forever, like a
    /// transaction stuck in the mempool.
    pub fn hang_claims_for(&self, channel_id: H256) {
        self.hanging_claims.write().insert(channel_id);
    }

    pub fn clear_claim_failures(&self) {
        self.failing_claims.write().clear();
        self.hanging_claims.write().clear();
    }

    /// Make every read fail with `reason`, or restore reads with `None`.
    pub fn set_read_failure(&self, reason: Option<&str>) {
        *self.read_failure.write() = reason.map(str::to_string);
    }

    pub fn claims(&self) -> Vec<ClaimRecord> {
        self.claims.lock().clone()
    }

    fn check_reads(&self) -> Result<(), GatewayError> {
        match self.read_failure.read().as_ref() {
            Some(reason) => Err(GatewayError::Read(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainGateway for InMemoryGateway {
    async fn get_channel(&self, channel_id: H256) -> Result<OnChainChannel, GatewayError> {
        self.check_reads()?;
        Ok(self
            .channels
            .read()
            .get(&channel_id)
            .cloned()
            .unwrap_or(OnChainChannel {
                consumer: Address::zero(),
                provider: Address::zero(),
                deposit: U256::zero(),
                claimed: false,
                expiry: 0,
            }))
    }

    async fn get_balance(&self, channel_id: H256) -> Result<U256, GatewayError> {
        self.check_reads()?;
        let channels = self.channels.read();
        Ok(match channels.get(&channel_id) {
            Some(channel) if !channel.claimed => channel.deposit,
            _ => U256::zero(),
        })
    }

    async fn claim(
        &self,
        channel_id: H256,
        amount: U256,
        nonce: U256,
        signature: &Signature,
    ) -> Result<H256, GatewayError> {
        let mut preimage = channel_id.as_bytes().to_vec();
        preimage.extend_from_slice(&signature.to_vec());
        let tx_hash = H256::from(keccak256(preimage));

        let hangs = self.hanging_claims.read().contains(&channel_id);
        if hangs {
            std::future::pending::<()>().await;
        }
        if self.failing_claims.read().contains(&channel_id) {
            return Err(GatewayError::Reverted(tx_hash));
        }

        {
            let mut channels = self.channels.write();
            let channel = channels
                .get_mut(&channel_id)
                .ok_or_else(|| GatewayError::Claim(format!("unknown channel {channel_id:#x}")))?;
            if amount > channel.deposit {
                return Err(GatewayError::Reverted(tx_hash));
            }
            if !self.domain.verify(
                &Voucher {
                    channel_id,
                    amount,
                    nonce,
                    signature: *signature,
                },
                channel.consumer,
            ) {
                return Err(GatewayError::Reverted(tx_hash));
            }
            channel.claimed = true;
        }

        self.claims.lock().push(ClaimRecord {
            channel_id,
            amount,
            nonce,
            tx_hash,
        });
        Ok(tx_hash)
    }

    fn domain(&self) -> &VoucherDomain {
        &self.domain
    }
}
