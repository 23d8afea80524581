//! Configuration for voucher-gate.

use crate::chain::ChainSettings;
use crate::state::{PaymentSettings, RetentionPolicy};
use crate::types::wire::u256_dec;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Path of the JSON channel ledger.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// What happens to superseded vouchers.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Settlement contract connection.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Claim scheduling.
    #[serde(default)]
    pub claims: ClaimConfig,

    /// Request pricing floor.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Bearer token for the `/payments` admin routes. Unset disables them.
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Settlement contract and voucher domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Escrow contract, also the EIP-712 verifying contract.
    #[serde(default)]
    pub contract_address: Address,

    /// Provider identity channels must name. Defaults to the signer address.
    #[serde(default)]
    pub provider_address: Option<Address>,

    #[serde(default = "default_domain_name")]
    pub domain_name: String,

    #[serde(default = "default_domain_version")]
    pub domain_version: String,

    /// Confirmations to wait for before a claim counts as settled.
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

/// Claim scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Run the background expiry claimer.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum voucher amount for a non-forced claim.
    #[serde(default = "default_claim_threshold", with = "u256_dec")]
    pub threshold: U256,

    #[serde(default = "default_claim_interval")]
    pub interval_secs: u64,

    /// Claim channels expiring within this many seconds.
    #[serde(default = "default_expiry_buffer")]
    pub expiry_buffer_secs: u64,

    /// Give up on a claim not confirmed within this many seconds; the
    /// channel is retried on the next pass.
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,
}

/// Pricing floor for pre-authorization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Estimate used when no upstream layer supplies one.
    #[serde(default, with = "u256_dec")]
    pub min_request_cost: U256,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ledger_path: default_ledger_path(),
            retention: RetentionPolicy::default(),
            chain: ChainConfig::default(),
            claims: ClaimConfig::default(),
            pricing: PricingConfig::default(),
            admin_token: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            contract_address: Address::zero(),
            provider_address: None,
            domain_name: default_domain_name(),
            domain_version: default_domain_version(),
            confirmations: default_confirmations(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_claim_threshold(),
            interval_secs: default_claim_interval(),
            expiry_buffer_secs: default_expiry_buffer(),
            claim_timeout_secs: default_claim_timeout(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8402))
}

fn default_ledger_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "voucher-gate")
        .map(|dirs| dirs.data_dir().join("ledger.json"))
        .unwrap_or_else(|| PathBuf::from(".voucher-gate/ledger.json"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

const fn default_chain_id() -> u64 {
    31337
}

fn default_domain_name() -> String {
    "PaymentChannel".to_string()
}

fn default_domain_version() -> String {
    "1".to_string()
}

const fn default_confirmations() -> usize {
    1
}

const fn default_read_timeout() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

fn default_claim_threshold() -> U256 {
    U256::from(1_000_000u64)
}

const fn default_claim_interval() -> u64 {
    600
}

const fn default_expiry_buffer() -> u64 {
    3600
}

const fn default_claim_timeout() -> u64 {
    120
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Gateway connection settings for the given signing key.
    pub fn chain_settings(&self, private_key: String) -> ChainSettings {
        ChainSettings {
            rpc_url: self.chain.rpc_url.clone(),
            chain_id: self.chain.chain_id,
            contract_address: self.chain.contract_address,
            private_key,
            domain_name: self.chain.domain_name.clone(),
            domain_version: self.chain.domain_version.clone(),
            confirmations: self.chain.confirmations,
            read_timeout: Duration::from_secs(self.chain.read_timeout_secs),
            claim_timeout: Duration::from_secs(self.claims.claim_timeout_secs),
        }
    }

    /// Payment-path settings, given the address claims are signed with.
    pub fn payment_settings(&self, signer: Address) -> PaymentSettings {
        PaymentSettings {
            provider: self.chain.provider_address.unwrap_or(signer),
            claim_threshold: self.claims.threshold,
            min_request_cost: self.pricing.min_request_cost,
            expiry_buffer_secs: self.claims.expiry_buffer_secs,
            // Slightly above the gateway's own bound so its error wins.
            claim_timeout: Duration::from_secs(self.claims.claim_timeout_secs + 5),
        }
    }
}
