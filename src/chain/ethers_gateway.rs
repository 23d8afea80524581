use crate::chain::{ChainGateway, OnChainChannel};
use crate::types::GatewayError;
use crate::utils::VoucherDomain;
use async_trait::async_trait;
use ethers::{
    contract::abigen,
    middleware::SignerMiddleware,
    providers::{Http, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, Signature, H256, U256, U64},
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

abigen!(
    ChannelEscrow,
    r#"[
        function getChannel(bytes32 channelId) external view returns (address consumer, address provider, uint256 deposit, bool claimed, uint256 expiry)
        function getBalance(bytes32 channelId) external view returns (uint256)
        function claim(bytes32 channelId, uint256 amount, uint256 nonce, bytes signature) external
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Connection parameters for [`EthersGateway`].
#[derive(Clone, Debug)]
pub struct ChainSettings {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: Address,
    pub private_key: String,
    pub domain_name: String,
    pub domain_version: String,
    pub confirmations: usize,
    pub read_timeout: Duration,
    /// Bound on submission plus confirmation of one claim.
    pub claim_timeout: Duration,
}

/// [`ChainGateway`] backed by a JSON-RPC endpoint and a local signing key.
pub struct EthersGateway {
    contract: ChannelEscrow<SignerClient>,
    domain: VoucherDomain,
    signer_address: Address,
    confirmations: usize,
    read_timeout: Duration,
    claim_timeout: Duration,
}

impl EthersGateway {
    pub fn connect(settings: &ChainSettings) -> Result<Self, GatewayError> {
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
            .map_err(|e| GatewayError::Config(format!("rpc url: {e}")))?;
        let wallet = settings
            .private_key
            .parse::<LocalWallet>()
            .map_err(|e| GatewayError::Config(format!("private key: {e}")))?
            .with_chain_id(settings.chain_id);
        let signer_address = wallet.address();

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = ChannelEscrow::new(settings.contract_address, client);
        let domain = VoucherDomain::new(
            settings.domain_name.clone(),
            settings.domain_version.clone(),
            settings.chain_id,
            settings.contract_address,
        );

        info!(
            contract = ?settings.contract_address,
            chain_id = settings.chain_id,
            signer = ?signer_address,
            "Connected settlement gateway"
        );

        Ok(Self {
            contract,
            domain,
            signer_address,
            confirmations: settings.confirmations,
            read_timeout: settings.read_timeout,
            claim_timeout: settings.claim_timeout,
        })
    }

    /// Address claims are sent from, which is this service's provider identity.
    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    async fn read<T, E: std::fmt::Display>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.read_timeout, call).await {
            Ok(result) => result.map_err(|e| GatewayError::Read(format!("{what}: {e}"))),
            Err(_) => Err(GatewayError::Read(format!(
                "{what}: timed out after {:?}",
                self.read_timeout
            ))),
        }
    }

    async fn submit_claim(
        &self,
        channel_id: H256,
        amount: U256,
        nonce: U256,
        signature: &Signature,
    ) -> Result<H256, GatewayError> {
        let call = self.contract.claim(
            channel_id.0,
            amount,
            nonce,
            Bytes::from(signature.to_vec()),
        );
        let pending = call
            .send()
            .await
            .map_err(|e| GatewayError::Claim(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!(?channel_id, %amount, %nonce, ?tx_hash, "Claim submitted");

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| GatewayError::Claim(e.to_string()))?;

        match receipt {
            Some(receipt) if receipt.status == Some(U64::one()) => Ok(tx_hash),
            Some(_) => Err(GatewayError::Reverted(tx_hash)),
            None => Err(GatewayError::Claim(format!(
                "transaction {tx_hash:#x} dropped from mempool"
            ))),
        }
    }
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

#[async_trait]
impl ChainGateway for EthersGateway {
    async fn get_channel(&self, channel_id: H256) -> Result<OnChainChannel, GatewayError> {
        let call = self.contract.get_channel(channel_id.0);
        let (consumer, provider, deposit, claimed, expiry) =
            self.read("getChannel", call.call()).await?;

        debug!(?channel_id, ?consumer, ?provider, %deposit, claimed, %expiry, "Read channel");

        Ok(OnChainChannel {
            consumer,
            provider,
            deposit,
            claimed,
            expiry: saturating_u64(expiry),
        })
    }

    async fn get_balance(&self, channel_id: H256) -> Result<U256, GatewayError> {
        let call = self.contract.get_balance(channel_id.0);
        self.read("getBalance", call.call()).await
    }

    async fn claim(
        &self,
        channel_id: H256,
        amount: U256,
        nonce: U256,
        signature: &Signature,
    ) -> Result<H256, GatewayError> {
        let submit = self.submit_claim(channel_id, amount, nonce, signature);
        match tokio::time::timeout(self.claim_timeout, submit).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?channel_id, %amount, timeout = ?self.claim_timeout, "Claim not confirmed in time");
                Err(GatewayError::Claim(format!(
                    "not confirmed within {:?}",
                    self.claim_timeout
                )))
            }
        }
    }

    fn domain(&self) -> &VoucherDomain {
        &self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ChainSettings {
        ChainSettings {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 31337,
            contract_address: Address::repeat_byte(0x42),
            private_key: "1234567890123456789012345678901234567890123456789012345678901234"
                .to_string(),
            domain_name: "PaymentChannel".to_string(),
            domain_version: "1".to_string(),
            confirmations: 1,
            read_timeout: Duration::from_secs(5),
            claim_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_connect_builds_domain_from_settings() {
        let gateway = EthersGateway::connect(&settings()).unwrap();
        let domain = gateway.domain();
        assert_eq!(domain.chain_id, 31337);
        assert_eq!(domain.verifying_contract, Address::repeat_byte(0x42));
        assert!(!gateway.signer_address().is_zero());
    }

    #[test]
    fn test_connect_rejects_bad_key() {
        let mut bad = settings();
        bad.private_key = "not-a-key".to_string();
        assert!(matches!(
            EthersGateway::connect(&bad),
            Err(GatewayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_rpc_surfaces_read_error() {
        let mut unreachable = settings();
        unreachable.rpc_url = "http://127.0.0.1:9".to_string();
        unreachable.read_timeout = Duration::from_secs(2);
        let gateway = EthersGateway::connect(&unreachable).unwrap();
        let err = gateway.get_channel(H256::zero()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Read(_)));
    }

    #[tokio::test]
    async fn test_claim_against_unreachable_rpc_is_bounded() {
        let mut unreachable = settings();
        unreachable.rpc_url = "http://127.0.0.1:9".to_string();
        unreachable.claim_timeout = Duration::from_secs(2);
        let gateway = EthersGateway::connect(&unreachable).unwrap();
        let signature = Signature {
            r: U256::one(),
            s: U256::one(),
            v: 27,
        };

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            gateway.claim(H256::zero(), U256::one(), U256::one(), &signature),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(GatewayError::Claim(_))));
    }

    #[test]
    fn test_saturating_expiry() {
        assert_eq!(saturating_u64(U256::from(1_700_000_000u64)), 1_700_000_000);
        assert_eq!(saturating_u64(U256::MAX), u64::MAX);
    }
}
