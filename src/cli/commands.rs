//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use solana_client::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::address::{is_zero, parse_address};
use crate::agent::ForwarderAgent;
use crate::config::{Config, LedgerBackend};
use crate::ledger::rpc::read_keypair;
use crate::ledger::{LedgerSnapshot, MemoryLedger, NativeLedger, RpcLedger, TokenLedger};
use crate::store::{LocalState, StateStore};

/// A loaded agent wired to its ledger backend
struct Session {
    store: StateStore,
    agent: ForwarderAgent,
    /// Present for the local backend; persisted with the agent
    memory: Option<Arc<MemoryLedger>>,
    native: Arc<dyn NativeLedger>,
    tokens: Arc<dyn TokenLedger>,
}

impl Session {
    async fn open(config: &Config) -> Result<Self> {
        let store = StateStore::new(&config.agent.state_path);
        let state = store.load().await?.with_context(|| {
            format!(
                "No agent found at {}. Run `forwarder deploy` first.",
                store.path().display()
            )
        })?;

        let (memory, native, tokens): (
            Option<Arc<MemoryLedger>>,
            Arc<dyn NativeLedger>,
            Arc<dyn TokenLedger>,
        ) = match config.ledger.backend {
            LedgerBackend::Local => {
                let ledger = Arc::new(MemoryLedger::from_snapshot(&state.ledger)?);
                let native: Arc<dyn NativeLedger> = ledger.clone();
                let tokens: Arc<dyn TokenLedger> = ledger.clone();
                (Some(ledger), native, tokens)
            }
            LedgerBackend::Rpc => {
                let ledger = Arc::new(rpc_ledger(config)?);
                if ledger.agent_address() != state.agent.address {
                    anyhow::bail!(
                        "Agent keypair {} does not match deployed agent {}",
                        ledger.agent_address(),
                        state.agent.address
                    );
                }
                let native: Arc<dyn NativeLedger> = ledger.clone();
                let tokens: Arc<dyn TokenLedger> = ledger;
                (None, native, tokens)
            }
        };

        let agent = ForwarderAgent::from_record(state.agent, native.clone(), tokens.clone());

        Ok(Self {
            store,
            agent,
            memory,
            native,
            tokens,
        })
    }

    fn memory(&self) -> Result<&Arc<MemoryLedger>> {
        self.memory
            .as_ref()
            .context("This command needs the local ledger backend")
    }

    async fn save(&self) -> Result<()> {
        let ledger = match &self.memory {
            Some(memory) => memory.snapshot()?,
            None => LedgerSnapshot::default(),
        };

        self.store
            .save(&LocalState {
                agent: self.agent.to_record(),
                ledger,
            })
            .await?;
        Ok(())
    }

    /// Throwaway copy of the agent over a copy of the local ledger
    fn simulation(&self) -> Result<ForwarderAgent> {
        let ledger = Arc::new(MemoryLedger::from_snapshot(&self.memory()?.snapshot()?)?);
        Ok(ForwarderAgent::from_record(
            self.agent.to_record(),
            ledger.clone(),
            ledger,
        ))
    }
}

fn rpc_ledger(config: &Config) -> Result<RpcLedger> {
    let endpoint = config.rpc_endpoint()?;
    let rpc_client = RpcClient::new_with_timeout(
        endpoint,
        std::time::Duration::from_millis(config.rpc.timeout_ms),
    );

    let agent = read_keypair(&config.rpc.agent_keypair_path)?;
    let fee_payer = read_keypair(&config.rpc.fee_payer_keypair_path)?;
    Ok(RpcLedger::new(rpc_client, agent, fee_payer))
}

fn parse_pubkey(s: &str, what: &str) -> Result<Pubkey> {
    parse_address(s).with_context(|| format!("Invalid {} address", what))
}

fn confirm(prompt: String) -> Result<bool> {
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Create the agent, optionally bound to a destination
pub async fn deploy(config: &Config, destination: Option<String>) -> Result<()> {
    let store = StateStore::new(&config.agent.state_path);
    if let Some(existing) = store.load().await? {
        anyhow::bail!(
            "Agent {} already deployed at {}",
            existing.agent.address,
            store.path().display()
        );
    }

    let destination = parse_pubkey(
        destination.as_deref().unwrap_or(&config.agent.destination),
        "destination",
    )?;

    let address = match config.ledger.backend {
        LedgerBackend::Local => Keypair::new().pubkey(),
        LedgerBackend::Rpc => read_keypair(&config.rpc.agent_keypair_path)?.pubkey(),
    };

    let ledger = Arc::new(MemoryLedger::new());
    let agent = ForwarderAgent::new(address, destination, ledger.clone(), ledger.clone());

    store
        .save(&LocalState {
            agent: agent.to_record(),
            ledger: ledger.snapshot()?,
        })
        .await?;

    println!("Agent deployed: {}", address);
    if is_zero(&destination) {
        println!("Destination: (unbound) - run `forwarder init <address>`");
    } else {
        println!("Destination: {}", destination);
    }
    Ok(())
}

/// Bind the destination
pub async fn init(config: &Config, destination: &str) -> Result<()> {
    let session = Session::open(config).await?;
    let destination = parse_pubkey(destination, "destination")?;

    session.agent.init(destination)?;
    session.save().await?;

    println!("Destination bound: {}", destination);
    Ok(())
}

/// Credit native currency to the agent (local backend)
pub async fn fund(config: &Config, amount: u64) -> Result<()> {
    let session = Session::open(config).await?;
    let address = session.agent.address();

    session.memory()?.credit(&address, amount)?;
    session.save().await?;

    println!(
        "Credited {} to {} (balance {})",
        amount,
        address,
        session.native.balance(&address)?
    );
    Ok(())
}

/// Credit tokens to the agent (local backend)
pub async fn mint(config: &Config, token: &str, amount: u64) -> Result<()> {
    let session = Session::open(config).await?;
    let token = parse_pubkey(token, "token")?;
    let address = session.agent.address();

    session.memory()?.mint_tokens(&token, &address, amount)?;
    session.save().await?;

    println!(
        "Minted {} of {} to {} (balance {})",
        amount,
        token,
        address,
        session.tokens.balance_of(&token, &address)?
    );
    Ok(())
}

/// Make an address refuse native transfers (local backend)
pub async fn reject(config: &Config, address: &str, clear: bool) -> Result<()> {
    let session = Session::open(config).await?;
    let address = parse_pubkey(address, "account")?;

    session.memory()?.set_rejecting(&address, !clear)?;
    session.save().await?;

    if clear {
        println!("{} accepts native transfers", address);
    } else {
        println!("{} now rejects native transfers", address);
    }
    Ok(())
}

/// Sweep the native balance
pub async fn flush_eth(config: &Config, force: bool, dry_run: bool) -> Result<()> {
    let session = Session::open(config).await?;
    let address = session.agent.address();
    let balance = session.native.balance(&address)?;

    info!("flush-eth: agent={}, balance={}", address, balance);

    if dry_run {
        return match config.ledger.backend {
            LedgerBackend::Local => {
                let amount = session.simulation()?.flush_eth()?;
                println!(
                    "DRY-RUN: would send {} to {}",
                    amount,
                    session.agent.destination()
                );
                Ok(())
            }
            LedgerBackend::Rpc => {
                warn!("DRY-RUN on rpc backend only reports the current balance");
                println!(
                    "DRY-RUN: balance {} -> destination {}",
                    balance,
                    session.agent.destination()
                );
                Ok(())
            }
        };
    }

    if !force
        && session.agent.is_bound()
        && balance > 0
        && !confirm(format!(
            "Send {} to {}? This cannot be undone.",
            balance,
            session.agent.destination()
        ))?
    {
        info!("Flush cancelled by user");
        return Ok(());
    }

    match session.agent.flush_eth() {
        Ok(amount) => {
            session.save().await?;
            println!("ETHFlushed({}, {})", session.agent.destination(), amount);
            Ok(())
        }
        Err(e) => {
            error!("flush-eth failed: {}", e);
            Err(e.into())
        }
    }
}

/// Sweep the balance of one token
pub async fn flush_erc20(config: &Config, token: &str, force: bool, dry_run: bool) -> Result<()> {
    let session = Session::open(config).await?;
    let token = parse_pubkey(token, "token")?;
    let address = session.agent.address();
    let balance = if is_zero(&token) {
        0
    } else {
        session.tokens.balance_of(&token, &address)?
    };

    info!(
        "flush-erc20: agent={}, token={}, balance={}",
        address, token, balance
    );

    if dry_run {
        return match config.ledger.backend {
            LedgerBackend::Local => {
                let amount = session.simulation()?.flush_erc20(token)?;
                println!(
                    "DRY-RUN: would send {} of {} to {}",
                    amount,
                    token,
                    session.agent.destination()
                );
                Ok(())
            }
            LedgerBackend::Rpc => {
                warn!("DRY-RUN on rpc backend only reports the current balance");
                println!(
                    "DRY-RUN: {} of {} -> destination {}",
                    balance,
                    token,
                    session.agent.destination()
                );
                Ok(())
            }
        };
    }

    if !force
        && session.agent.is_bound()
        && balance > 0
        && !confirm(format!(
            "Send {} of {} to {}? This cannot be undone.",
            balance,
            token,
            session.agent.destination()
        ))?
    {
        info!("Flush cancelled by user");
        return Ok(());
    }

    match session.agent.flush_erc20(token) {
        Ok(amount) => {
            session.save().await?;
            println!(
                "ERC20Flushed({}, {}, {})",
                token,
                session.agent.destination(),
                amount
            );
            Ok(())
        }
        Err(e) => {
            error!("flush-erc20 failed: {}", e);
            Err(e.into())
        }
    }
}

/// Show agent address, destination and balances
pub async fn status(config: &Config) -> Result<()> {
    let session = Session::open(config).await?;
    let address = session.agent.address();

    println!("\n=== Forwarder Agent ===\n");
    println!("Address:     {}", address);
    if session.agent.is_bound() {
        println!("Destination: {}", session.agent.destination());
    } else {
        println!("Destination: (unbound)");
    }
    println!("Backend:     {:?}", config.ledger.backend);
    println!("Balance:     {}", session.native.balance(&address)?);

    if let Some(memory) = &session.memory {
        let snapshot = memory.snapshot()?;
        let held = held_tokens(&snapshot, &address);
        if held.is_empty() {
            println!("Tokens:      (none)");
        } else {
            println!("Tokens:");
            for (token, amount) in held {
                println!("  {} {}", token, amount);
            }
        }
    }

    println!("Events:      {}", session.agent.events().len());
    Ok(())
}

/// Print the most recent events
pub async fn events(config: &Config, limit: usize) -> Result<()> {
    let session = Session::open(config).await?;
    let events = session.agent.events();

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    let start = events.len().saturating_sub(limit);
    for record in &events[start..] {
        println!(
            "{}  {}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.id.get(..8).unwrap_or(&record.id),
            record.event
        );
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Tokens with a positive balance held by `account` in a snapshot
fn held_tokens(snapshot: &LedgerSnapshot, account: &Pubkey) -> Vec<(String, u64)> {
    let account = account.to_string();
    snapshot
        .tokens
        .iter()
        .filter_map(|(token, holders)| {
            holders
                .get(&account)
                .filter(|amount| **amount > 0)
                .map(|amount| (token.clone(), *amount))
        })
        .collect()
}
