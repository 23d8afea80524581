//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use ethers::types::{Address, U256};
use std::net::SocketAddr;
use std::path::PathBuf;
use voucher_gate::{GatewayConfig, RetentionPolicy};

/// Voucher-metered HTTP gateway with on-chain channel settlement.
#[derive(Parser, Debug)]
#[command(name = "voucher-gate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Listen address.
    #[arg(long, short, env = "VOUCHER_GATE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Channel ledger file.
    #[arg(long, env = "VOUCHER_GATE_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Retention of superseded vouchers.
    #[arg(long, value_enum, env = "VOUCHER_GATE_RETENTION")]
    pub retention: Option<CliRetention>,

    /// JSON-RPC endpoint.
    #[arg(long, env = "VOUCHER_GATE_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Escrow contract address.
    #[arg(long, env = "VOUCHER_GATE_CONTRACT", value_parser = parse_address)]
    pub contract: Option<Address>,

    /// Chain id of the escrow deployment.
    #[arg(long, env = "VOUCHER_GATE_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Key used to sign claim transactions.
    #[arg(long, env = "VOUCHER_GATE_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Minimum voucher amount for scheduled claims, in base units.
    #[arg(long, env = "VOUCHER_GATE_CLAIM_THRESHOLD", value_parser = parse_u256)]
    pub claim_threshold: Option<U256>,

    /// Disable the background expiry claimer.
    #[arg(long)]
    pub no_auto_claim: bool,

    /// Bearer token for the admin routes.
    #[arg(long, env = "VOUCHER_GATE_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Log level. Overrides the config file.
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "VOUCHER_GATE_LOG_JSON")]
    pub log_json: bool,
}

/// Retention CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliRetention {
    /// Keep every voucher.
    RetainAll,
    /// Drop superseded unclaimed vouchers.
    PruneSuperseded,
}

fn parse_address(raw: &str) -> Result<Address, String> {
    raw.parse::<Address>().map_err(|e| e.to_string())
}

fn parse_u256(raw: &str) -> Result<U256, String> {
    U256::from_dec_str(raw).map_err(|e| e.to_string())
}

impl Cli {
    /// Convert CLI arguments into a GatewayConfig.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(&self) -> color_eyre::Result<GatewayConfig> {
        let mut config = if let Some(ref path) = self.config {
            GatewayConfig::from_file(path)?
        } else {
            GatewayConfig::default()
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(ref ledger) = self.ledger {
            config.ledger_path = ledger.clone();
        }
        if let Some(retention) = self.retention {
            config.retention = retention.into();
        }
        if let Some(ref rpc_url) = self.rpc_url {
            config.chain.rpc_url = rpc_url.clone();
        }
        if let Some(contract) = self.contract {
            config.chain.contract_address = contract;
        }
        if let Some(chain_id) = self.chain_id {
            config.chain.chain_id = chain_id;
        }
        if let Some(threshold) = self.claim_threshold {
            config.claims.threshold = threshold;
        }
        if self.no_auto_claim {
            config.claims.enabled = false;
        }
        if let Some(ref token) = self.admin_token {
            config.admin_token = Some(token.clone());
        }
        if let Some(ref log_level) = self.log_level {
            config.log_level = log_level.clone();
        }

        Ok(config)
    }
}

impl From<CliRetention> for RetentionPolicy {
    fn from(r: CliRetention) -> Self {
        match r {
            CliRetention::RetainAll => RetentionPolicy::RetainAll,
            CliRetention::PruneSuperseded => RetentionPolicy::PruneSuperseded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "1234567890123456789012345678901234567890123456789012345678901234";

    fn config_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voucher-gate.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_config_file_log_level_survives_without_flag() {
        let (_dir, path) = config_file("log_level = \"debug\"\n");
        let cli = Cli::try_parse_from([
            "voucher-gate",
            "--config",
            path.to_str().unwrap(),
            "--private-key",
            KEY,
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        // RUST_LOG in the environment legitimately takes precedence.
        let expected = std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string());
        assert_eq!(config.log_level, expected);
    }

    #[test]
    fn test_flags_override_config_file() {
        let (_dir, path) = config_file(
            "log_level = \"debug\"\nadmin_token = \"from-file\"\n\n[claims]\nenabled = true\n",
        );
        let cli = Cli::try_parse_from([
            "voucher-gate",
            "--config",
            path.to_str().unwrap(),
            "--private-key",
            KEY,
            "--log-level",
            "trace",
            "--admin-token",
            "from-flag",
            "--no-auto-claim",
            "--claim-threshold",
            "42",
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.admin_token.as_deref(), Some("from-flag"));
        assert!(!config.claims.enabled);
        assert_eq!(config.claims.threshold, U256::from(42u64));
    }
}
