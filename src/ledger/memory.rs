//! In-process ledger
//!
//! Holds native and token balances in memory. Used by the local CLI backend
//! (persisted through [`LedgerSnapshot`]) and by tests.
//!
//! Recipients can be made to refuse value (`set_rejecting`) or to run code when
//! they are paid (`set_receive_hook`). Token mints can run code on every
//! transfer (`set_token_hook`). Hooks run synchronously with no ledger lock
//! held, so they may call back into an agent. A failing hook restores the
//! ledger to its state before the transfer, nested effects included.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use super::{NativeLedger, TokenLedger};
use crate::error::{Error, Result};

/// Code run on transfer: `(from, to, amount)`
pub type TransferHook = Arc<dyn Fn(&Pubkey, &Pubkey, u64) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`TransferHook`]
pub fn transfer_hook<F>(f: F) -> TransferHook
where
    F: Fn(&Pubkey, &Pubkey, u64) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a token mint answers transfer calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum TokenBehavior {
    /// Moves balances and reports success
    #[default]
    Standard,

    /// Fails the call with a reason
    Reverts(String),

    /// Reports `false` without moving anything
    ReturnsFalse,
}

#[derive(Debug, Clone, Default)]
struct Balances {
    native: HashMap<Pubkey, u64>,
    tokens: HashMap<Pubkey, HashMap<Pubkey, u64>>,
    rejecting: HashSet<Pubkey>,
    token_behavior: HashMap<Pubkey, TokenBehavior>,
}

impl Balances {
    fn native_of(&self, account: &Pubkey) -> u64 {
        self.native.get(account).copied().unwrap_or(0)
    }

    fn token_of(&self, token: &Pubkey, account: &Pubkey) -> u64 {
        self.tokens
            .get(token)
            .and_then(|holders| holders.get(account))
            .copied()
            .unwrap_or(0)
    }
}

/// Serializable ledger contents (base58 keys, zero balances omitted)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub native: BTreeMap<String, u64>,

    /// token -> holder -> amount
    #[serde(default)]
    pub tokens: BTreeMap<String, BTreeMap<String, u64>>,

    /// Addresses that refuse native transfers
    #[serde(default)]
    pub rejecting: BTreeSet<String>,

    #[serde(default)]
    pub token_behavior: BTreeMap<String, TokenBehavior>,
}

/// In-memory native + token ledger
#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<Balances>,
    receive_hooks: Mutex<HashMap<Pubkey, TransferHook>>,
    token_hooks: Mutex<HashMap<Pubkey, TransferHook>>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from a snapshot
    pub fn from_snapshot(snapshot: &LedgerSnapshot) -> Result<Self> {
        let mut balances = Balances::default();

        for (account, amount) in &snapshot.native {
            balances.native.insert(parse_key(account)?, *amount);
        }
        for (token, holders) in &snapshot.tokens {
            let token = parse_key(token)?;
            let entry = balances.tokens.entry(token).or_default();
            for (holder, amount) in holders {
                entry.insert(parse_key(holder)?, *amount);
            }
        }
        for account in &snapshot.rejecting {
            balances.rejecting.insert(parse_key(account)?);
        }
        for (token, behavior) in &snapshot.token_behavior {
            balances
                .token_behavior
                .insert(parse_key(token)?, behavior.clone());
        }

        Ok(Self {
            balances: Mutex::new(balances),
            ..Default::default()
        })
    }

    /// Capture the ledger contents. Hooks are not part of a snapshot.
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let balances = self.balances()?;

        let native = balances
            .native
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(account, amount)| (account.to_string(), *amount))
            .collect();

        let tokens = balances
            .tokens
            .iter()
            .map(|(token, holders)| {
                let holders: BTreeMap<String, u64> = holders
                    .iter()
                    .filter(|(_, amount)| **amount > 0)
                    .map(|(holder, amount)| (holder.to_string(), *amount))
                    .collect();
                (token.to_string(), holders)
            })
            .filter(|(_, holders)| !holders.is_empty())
            .collect();

        Ok(LedgerSnapshot {
            native,
            tokens,
            rejecting: balances.rejecting.iter().map(|a| a.to_string()).collect(),
            token_behavior: balances
                .token_behavior
                .iter()
                .filter(|(_, behavior)| **behavior != TokenBehavior::Standard)
                .map(|(token, behavior)| (token.to_string(), behavior.clone()))
                .collect(),
        })
    }

    /// Credit native currency with no associated call. Always accepted.
    pub fn credit(&self, account: &Pubkey, amount: u64) -> Result<()> {
        let mut balances = self.balances()?;
        let entry = balances.native.entry(*account).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| Error::Internal("native balance overflow".into()))?;
        debug!("Credited {} to {} (balance {})", amount, account, entry);
        Ok(())
    }

    /// Credit `amount` of `token` to `account`
    pub fn mint_tokens(&self, token: &Pubkey, account: &Pubkey, amount: u64) -> Result<()> {
        let mut balances = self.balances()?;
        let entry = balances
            .tokens
            .entry(*token)
            .or_default()
            .entry(*account)
            .or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| Error::Internal("token balance overflow".into()))?;
        debug!("Minted {} of {} to {}", amount, token, account);
        Ok(())
    }

    /// Make `account` refuse (or accept again) incoming native transfers
    pub fn set_rejecting(&self, account: &Pubkey, rejecting: bool) -> Result<()> {
        let mut balances = self.balances()?;
        if rejecting {
            balances.rejecting.insert(*account);
        } else {
            balances.rejecting.remove(account);
        }
        Ok(())
    }

    /// Set how `token` answers transfer calls
    pub fn set_token_behavior(&self, token: &Pubkey, behavior: TokenBehavior) -> Result<()> {
        self.balances()?.token_behavior.insert(*token, behavior);
        Ok(())
    }

    /// Run `hook` whenever `account` receives native currency
    pub fn set_receive_hook(&self, account: &Pubkey, hook: TransferHook) -> Result<()> {
        lock(&self.receive_hooks)?.insert(*account, hook);
        Ok(())
    }

    /// Run `hook` on every transfer of `token`
    pub fn set_token_hook(&self, token: &Pubkey, hook: TransferHook) -> Result<()> {
        lock(&self.token_hooks)?.insert(*token, hook);
        Ok(())
    }

    fn balances(&self) -> Result<MutexGuard<'_, Balances>> {
        lock(&self.balances)
    }

    fn restore(&self, saved: Balances) -> Result<()> {
        *self.balances()? = saved;
        Ok(())
    }
}

impl NativeLedger for MemoryLedger {
    fn balance(&self, account: &Pubkey) -> Result<u64> {
        Ok(self.balances()?.native_of(account))
    }

    fn transfer(&self, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        let saved = {
            let mut balances = self.balances()?;

            if balances.rejecting.contains(to) {
                warn!("{} refused {} native units", to, amount);
                return Err(Error::TransferFailed);
            }

            let available = balances.native_of(from);
            if available < amount {
                return Err(Error::Internal(format!(
                    "insufficient balance: {} < {}",
                    available, amount
                )));
            }

            let saved = balances.clone();
            balances.native.insert(*from, available - amount);
            let received = balances
                .native_of(to)
                .checked_add(amount)
                .ok_or_else(|| Error::Internal("native balance overflow".into()))?;
            balances.native.insert(*to, received);
            saved
        };

        let hook = lock(&self.receive_hooks)?.get(to).cloned();
        if let Some(hook) = hook {
            if let Err(e) = hook(from, to, amount) {
                warn!("Receive hook at {} failed: {}", to, e);
                self.restore(saved)?;
                return Err(Error::TransferFailed);
            }
        }

        Ok(())
    }
}

impl TokenLedger for MemoryLedger {
    fn balance_of(&self, token: &Pubkey, account: &Pubkey) -> Result<u64> {
        Ok(self.balances()?.token_of(token, account))
    }

    fn transfer(&self, token: &Pubkey, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<bool> {
        let saved = {
            let mut balances = self.balances()?;

            match balances.token_behavior.get(token).cloned().unwrap_or_default() {
                TokenBehavior::Standard => {}
                TokenBehavior::Reverts(reason) => return Err(Error::TokenTransfer(reason)),
                TokenBehavior::ReturnsFalse => return Ok(false),
            }

            let available = balances.token_of(token, from);
            if available < amount {
                return Err(Error::TokenTransfer(format!(
                    "transfer amount exceeds balance: {} < {}",
                    available, amount
                )));
            }

            let saved = balances.clone();
            let received = balances
                .token_of(token, to)
                .checked_add(amount)
                .ok_or_else(|| Error::TokenTransfer("balance overflow".into()))?;
            let holders = balances.tokens.entry(*token).or_default();
            holders.insert(*from, available - amount);
            holders.insert(*to, received);
            saved
        };

        let hook = lock(&self.token_hooks)?.get(token).cloned();
        if let Some(hook) = hook {
            if let Err(e) = hook(from, to, amount) {
                self.restore(saved)?;
                return Err(Error::TokenTransfer(e.to_string()));
            }
        }

        Ok(true)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("ledger lock poisoned".into()))
}

fn parse_key(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s)
        .map_err(|e| Error::Serialization(format!("Invalid address {} in snapshot: {}", s, e)))
}
