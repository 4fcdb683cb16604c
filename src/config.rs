//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::address::parse_address;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Named cluster profiles
    #[serde(default = "default_networks")]
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Selected profile; overrides `rpc.endpoint` when set
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Where the CLI keeps agent and local ledger state
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Destination passed at deploy time. Empty means unbound (zero address).
    #[serde(default)]
    pub destination: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            destination: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// In-memory ledger persisted in the state file
    #[default]
    Local,
    /// Signed transactions through an RPC node
    Rpc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Keypair the agent signs sweeps with
    #[serde(default)]
    pub agent_keypair_path: String,
    /// Keypair paying transaction fees
    #[serde(default)]
    pub fee_payer_keypair_path: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
            agent_keypair_path: String::new(),
            fee_payer_keypair_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// RPC URL; `${VAR}` is replaced from the environment
    pub url: String,
}

fn default_state_path() -> String {
    "forwarder-state.json".into()
}

fn default_rpc_endpoint() -> String {
    std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8899".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_networks() -> BTreeMap<String, NetworkConfig> {
    let mut networks = BTreeMap::new();
    networks.insert(
        "mainnet".to_string(),
        NetworkConfig {
            url: "https://mainnet.helius-rpc.com/?api-key=${HELIUS_API_KEY}".into(),
        },
    );
    networks.insert(
        "devnet".to_string(),
        NetworkConfig {
            url: "https://api.devnet.solana.com".into(),
        },
    );
    networks.insert(
        "localnet".to_string(),
        NetworkConfig {
            url: "http://127.0.0.1:8899".into(),
        },
    );
    networks
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("agent.state_path", default_state_path())?
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix FORWARDER_)
            .add_source(
                config::Environment::with_prefix("FORWARDER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        parse_address(&self.agent.destination).context("Invalid agent.destination")?;

        if self.agent.state_path.trim().is_empty() {
            anyhow::bail!("agent.state_path cannot be empty");
        }

        if self.rpc.timeout_ms == 0 {
            anyhow::bail!("rpc.timeout_ms must be positive");
        }

        if let Some(name) = &self.network {
            if !self.networks.contains_key(name) {
                anyhow::bail!(
                    "Unknown network '{}', configured: {:?}",
                    name,
                    self.networks.keys().collect::<Vec<_>>()
                );
            }
        }

        if self.ledger.backend == LedgerBackend::Rpc {
            if self.rpc.agent_keypair_path.is_empty() {
                anyhow::bail!("rpc backend requires rpc.agent_keypair_path");
            }
            if self.rpc.fee_payer_keypair_path.is_empty() {
                anyhow::bail!("rpc backend requires rpc.fee_payer_keypair_path");
            }
            // Resolves the endpoint, failing on unset ${VAR}s
            self.rpc_endpoint()?;
        }

        Ok(())
    }

    /// RPC endpoint of the selected network, or `rpc.endpoint`
    pub fn rpc_endpoint(&self) -> Result<String> {
        match &self.network {
            Some(name) => {
                let network = self
                    .networks
                    .get(name)
                    .with_context(|| format!("Unknown network '{}'", name))?;
                expand_env(&network.url)
            }
            None => Ok(self.rpc.endpoint.clone()),
        }
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let networks: Vec<String> = self
            .networks
            .iter()
            .map(|(name, network)| format!("    {}: {}", name, mask_url(&network.url)))
            .collect();

        format!(
            r#"Configuration:
  Agent:
    state_path: {}
    destination: {}
  Ledger:
    backend: {:?}
  RPC:
    endpoint: {}
    timeout: {}ms
    agent_keypair: {}
    fee_payer_keypair: {}
  Network: {}
  Networks:
{}
"#,
            self.agent.state_path,
            if self.agent.destination.is_empty() {
                "(unbound)"
            } else {
                self.agent.destination.as_str()
            },
            self.ledger.backend,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            if self.rpc.agent_keypair_path.is_empty() {
                "(not set)"
            } else {
                self.rpc.agent_keypair_path.as_str()
            },
            if self.rpc.fee_payer_keypair_path.is_empty() {
                "(not set)"
            } else {
                self.rpc.fee_payer_keypair_path.as_str()
            },
            self.network.as_deref().unwrap_or("(none)"),
            networks.join("\n"),
        )
    }
}

/// Replace `${VAR}` references with environment values
fn expand_env(template: &str) -> Result<String> {
    let pattern = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .context("Invalid env substitution pattern")?;

    let mut missing = Vec::new();
    let expanded = pattern.replace_all(template, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing.push(caps[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Environment variables not set: {}", missing.join(", "));
    }

    Ok(expanded.into_owned())
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            ledger: LedgerConfig::default(),
            rpc: RpcConfig::default(),
            networks: default_networks(),
            network: None,
        }
    }
}
