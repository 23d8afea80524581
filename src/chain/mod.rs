//! Settlement contract access.
//!
//! [`ChainGateway`] is the only seam through which the engine touches the
//! chain: channel reads, claim submission and voucher signature checks under
//! the deployment's EIP-712 domain.

mod ethers_gateway;
pub mod memory;

pub use ethers_gateway::{ChainSettings, EthersGateway};
pub use memory::InMemoryGateway;

use crate::types::{GatewayError, Voucher};
use crate::utils::VoucherDomain;
use async_trait::async_trait;
use ethers::types::{Address, Signature, H256, U256};

/// Canonical channel state as returned by the escrow contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnChainChannel {
    pub consumer: Address,
    pub provider: Address,
    pub deposit: U256,
    pub claimed: bool,
    /// Unix seconds.
    pub expiry: u64,
}

impl OnChainChannel {
    /// The contract returns a zeroed struct for unknown channel ids.
    pub fn exists(&self) -> bool {
        !self.consumer.is_zero()
    }
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn get_channel(&self, channel_id: H256) -> Result<OnChainChannel, GatewayError>;

    async fn get_balance(&self, channel_id: H256) -> Result<U256, GatewayError>;

    /// Submit a claim and wait for it to be mined. Returns the transaction hash.
    async fn claim(
        &self,
        channel_id: H256,
        amount: U256,
        nonce: U256,
        signature: &Signature,
    ) -> Result<H256, GatewayError>;

    fn domain(&self) -> &VoucherDomain;

    fn verify_voucher(&self, voucher: &Voucher, signer: Address) -> bool {
        self.domain().verify(voucher, signer)
    }
}
