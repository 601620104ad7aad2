use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::packet::PACKET_DATA_SIZE;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryConfig;

/// Confirmation strength, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn to_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl std::str::FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment level `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmStrategy {
    #[default]
    Poll,
    Subscribe,
}

/// Where the fee payer's key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    File(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// Derived from `http_url` when absent.
    #[serde(default)]
    pub ws_url: Option<String>,

    #[serde(default = "default_commitment")]
    pub commitment: Commitment,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    #[serde(default = "default_keypair_path")]
    pub keypair_path: PathBuf,

    #[serde(default)]
    pub confirm_strategy: ConfirmStrategy,

    #[serde(default = "default_max_transaction_size")]
    pub max_transaction_size: usize,

    #[serde(default = "default_max_signers")]
    pub max_signers: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_http_url() -> String {
    cluster_url("localnet").to_string()
}

fn default_commitment() -> Commitment {
    Commitment::Confirmed
}

fn default_poll_interval_ms() -> u64 {
    400
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_keypair_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".config/solana/id.json")
}

fn default_max_transaction_size() -> usize {
    PACKET_DATA_SIZE
}

fn default_max_signers() -> usize {
    12
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_url: default_http_url(),
            ws_url: None,
            commitment: default_commitment(),
            poll_interval_ms: default_poll_interval_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            keypair_path: default_keypair_path(),
            confirm_strategy: ConfirmStrategy::default(),
            max_transaction_size: default_max_transaction_size(),
            max_signers: default_max_signers(),
            retry: RetryConfig::default(),
        }
    }
}

/// Resolves a cluster alias to its RPC endpoint; anything else is taken as a URL.
pub fn cluster_url(cluster: &str) -> &str {
    match cluster {
        "devnet" => "https://api.devnet.solana.com",
        "testnet" => "https://api.testnet.solana.com",
        "mainnet" => "https://api.mainnet-beta.solana.com",
        "localnet" => "http://127.0.0.1:8899",
        custom => custom,
    }
}

/// `http(s)://host:port` to the matching pubsub endpoint. Local validators
/// serve websockets on the RPC port + 1.
pub fn derive_ws_url(http_url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = http_url.strip_prefix("https://") {
        ("wss://", rest)
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        ("ws://", rest)
    } else {
        return http_url.to_string();
    };

    let host = rest.trim_end_matches('/');
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse::<u16>() {
            Ok(p) => format!("{scheme}{name}:{}", p.saturating_add(1)),
            Err(_) => format!("{scheme}{rest}"),
        },
        None => format!("{scheme}{rest}"),
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// File config (or defaults), then CLI/environment overrides on top.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(url) = &args.url {
            config.http_url = cluster_url(url).to_string();
        } else {
            config.http_url = cluster_url(&config.http_url).to_string();
        }
        if let Some(ws_url) = &args.ws_url {
            config.ws_url = Some(ws_url.clone());
        }
        if let Some(keypair) = &args.keypair {
            config.keypair_path = keypair.clone();
        }
        if let Some(commitment) = args.commitment {
            config.commitment = commitment;
        }
        if let Some(ms) = args.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = args.timeout_secs {
            config.confirm_timeout_secs = secs;
        }
        if args.subscribe {
            config.confirm_strategy = ConfirmStrategy::Subscribe;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        anyhow::ensure!(
            self.confirm_timeout_secs > 0,
            "confirm_timeout_secs must be positive"
        );
        anyhow::ensure!(self.max_signers > 0, "max_signers must be positive");
        anyhow::ensure!(
            self.max_transaction_size > 0,
            "max_transaction_size must be positive"
        );
        Ok(())
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| derive_ws_url(&self.http_url))
    }

    pub fn key_source(&self) -> KeySource {
        KeySource::File(self.keypair_path.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to a JSON config file
    #[arg(short, long, env = "LEDGER_SUBMIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// RPC URL or cluster alias (localnet, devnet, testnet, mainnet)
    #[arg(short, long, env = "LEDGER_SUBMIT_URL")]
    pub url: Option<String>,

    /// WebSocket URL, derived from the RPC URL when omitted
    #[arg(long, env = "LEDGER_SUBMIT_WS_URL")]
    pub ws_url: Option<String>,

    /// Path to the fee payer keypair file
    #[arg(short, long, env = "ANCHOR_WALLET")]
    pub keypair: Option<PathBuf>,

    /// Commitment level to confirm at
    #[arg(long, env = "LEDGER_SUBMIT_COMMITMENT")]
    pub commitment: Option<Commitment>,

    /// Status polling interval in milliseconds
    #[arg(long, env = "LEDGER_SUBMIT_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Confirmation deadline in seconds
    #[arg(long, env = "LEDGER_SUBMIT_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Confirm via signatureSubscribe instead of polling
    #[arg(long)]
    pub subscribe: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a program's initialize instruction and confirm it
    Initialize {
        #[arg(short, long)]
        program_id: String,

        /// Anchor IDL describing the program's instructions
        #[arg(long)]
        idl: Option<PathBuf>,

        #[arg(long, default_value = "initialize")]
        instruction: String,

        /// Seeds of a program-derived account passed after the payer
        #[arg(long)]
        seed: Vec<String>,

        /// Anchor account type expected at the derived address, e.g. `SavingsManager`
        #[arg(long, requires = "seed")]
        account_type: Option<String>,
    },
    /// Print an account's on-chain state
    Account { address: String },
}
