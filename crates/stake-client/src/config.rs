//! Client configuration.
//!
//! A `StakeConfig` is plain data: it can be read from JSON or assembled from
//! a set of environment-style variables supplied by the caller. Nothing here
//! reads the process environment or the filesystem.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sol_primitives::Pubkey;

use crate::error::StakeClientError;
use crate::program::DEFAULT_PROGRAM_ID;
use crate::rpc::Commitment;

/// Ledger cluster the endpoint belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cluster {
    MainnetBeta,
    Devnet,
    Testnet,
    #[default]
    Localnet,
    Custom(String),
}

impl Cluster {
    /// Parse a moniker (`devnet`, `mainnet-beta`, `localnet`, ...) or an URL.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "mainnet" | "mainnet-beta" | "m" => Cluster::MainnetBeta,
            "devnet" | "d" => Cluster::Devnet,
            "testnet" | "t" => Cluster::Testnet,
            "localnet" | "localhost" | "l" => Cluster::Localnet,
            "https://api.mainnet-beta.solana.com" => Cluster::MainnetBeta,
            "https://api.devnet.solana.com" => Cluster::Devnet,
            "https://api.testnet.solana.com" => Cluster::Testnet,
            "http://127.0.0.1:8899" | "http://localhost:8899" => Cluster::Localnet,
            other => Cluster::Custom(other.to_string()),
        }
    }

    /// JSON-RPC endpoint.
    pub fn rpc_url(&self) -> &str {
        match self {
            Cluster::MainnetBeta => "https://api.mainnet-beta.solana.com",
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
            Cluster::Localnet => "http://127.0.0.1:8899",
            Cluster::Custom(url) => url,
        }
    }

    /// Pub-sub endpoint: the RPC URL with a websocket scheme; the local
    /// validator listens one port higher.
    pub fn ws_url(&self) -> String {
        match self {
            Cluster::Localnet => "ws://127.0.0.1:8900".to_string(),
            other => {
                let url = other.rpc_url();
                if let Some(rest) = url.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = url.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    url.to_string()
                }
            }
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Cluster::MainnetBeta => "Mainnet Beta",
            Cluster::Devnet => "Devnet",
            Cluster::Testnet => "Testnet",
            Cluster::Localnet => "Localnet",
            Cluster::Custom(url) => url,
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based): doubles each time,
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 250, 4_000)
    }
}

/// What the resolver does with a missing associated token account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreationPolicy {
    /// Hand back a creation instruction to ride in the stake transaction.
    #[default]
    Batch,
    /// Submit the creation in its own transaction right away.
    Immediate,
}

/// Everything one staking run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeConfig {
    #[serde(default)]
    pub cluster: Cluster,

    #[serde(default = "default_program_id")]
    pub program_id: Pubkey,

    /// Token being staked.
    pub mint: Pubkey,

    #[serde(default = "default_wallet_path")]
    pub wallet_path: String,

    #[serde(default)]
    pub commitment: Commitment,

    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for the program's event after confirmation.
    #[serde(default = "default_event_wait_ms")]
    pub event_wait_ms: u64,

    #[serde(default)]
    pub resolve_retry: RetryPolicy,

    #[serde(default)]
    pub reconcile_retry: RetryPolicy,

    #[serde(default)]
    pub creation_policy: CreationPolicy,
}

fn default_program_id() -> Pubkey {
    DEFAULT_PROGRAM_ID
}

fn default_wallet_path() -> String {
    "~/.config/solana/id.json".to_string()
}

fn default_confirm_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_event_wait_ms() -> u64 {
    3_000
}

impl StakeConfig {
    /// Defaults for everything but the mint.
    pub fn new(mint: Pubkey) -> Self {
        Self {
            cluster: Cluster::default(),
            program_id: default_program_id(),
            mint,
            wallet_path: default_wallet_path(),
            commitment: Commitment::default(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            event_wait_ms: default_event_wait_ms(),
            resolve_retry: RetryPolicy::default(),
            reconcile_retry: RetryPolicy::default(),
            creation_policy: CreationPolicy::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, StakeClientError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StakeClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `TOKEN_MINT` (required), `ANCHOR_WALLET`,
    /// `ANCHOR_PROVIDER_URL` and `STAKE_PROGRAM_ID`.
    ///
    /// Pass `std::env::vars()` to read the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, StakeClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mint = vars
            .get("TOKEN_MINT")
            .ok_or_else(|| StakeClientError::Config("TOKEN_MINT is not set".into()))?
            .parse::<Pubkey>()
            .map_err(|e| StakeClientError::Config(format!("TOKEN_MINT: {e}")))?;

        let mut config = Self::new(mint);

        if let Some(url) = vars.get("ANCHOR_PROVIDER_URL") {
            config.cluster = Cluster::parse(url);
        }
        if let Some(path) = vars.get("ANCHOR_WALLET") {
            config.wallet_path = path.clone();
        } else if let Some(home) = vars.get("HOME") {
            config.wallet_path = format!("{home}/.config/solana/id.json");
        }
        if let Some(id) = vars.get("STAKE_PROGRAM_ID") {
            config.program_id = id
                .parse()
                .map_err(|e| StakeClientError::Config(format!("STAKE_PROGRAM_ID: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StakeClientError> {
        if self.poll_interval_ms == 0 {
            return Err(StakeClientError::Config(
                "poll_interval_ms must be > 0".into(),
            ));
        }
        if self.confirm_timeout_ms < self.poll_interval_ms {
            return Err(StakeClientError::Config(format!(
                "confirm_timeout_ms ({}) is shorter than poll_interval_ms ({})",
                self.confirm_timeout_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn event_wait(&self) -> Duration {
        Duration::from_millis(self.event_wait_ms)
    }
}
