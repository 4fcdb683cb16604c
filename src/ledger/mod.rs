//! Ledger collaborators
//!
//! The agent never stores balances itself. Native-currency and token balances
//! live in ledgers injected into the agent:
//!
//! ```text
//! ForwarderAgent ──> NativeLedger (balance, transfer)
//!                └─> TokenLedger  (balance_of, transfer)
//! ```
//!
//! Two backends are provided: [`MemoryLedger`] for local runs and tests, and
//! [`RpcLedger`] which signs real transfers through a Solana RPC node.

pub mod memory;
pub mod rpc;

use solana_sdk::pubkey::Pubkey;

use crate::error::Result;

pub use memory::{transfer_hook, LedgerSnapshot, MemoryLedger, TokenBehavior, TransferHook};
pub use rpc::RpcLedger;

/// Native-currency ledger
pub trait NativeLedger: Send + Sync {
    /// Current native balance of `account`
    fn balance(&self, account: &Pubkey) -> Result<u64>;

    /// Move `amount` from `from` to `to`.
    ///
    /// Either the whole transfer applies or nothing does. A recipient that
    /// refuses the value yields `Error::TransferFailed`.
    fn transfer(&self, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<()>;
}

/// Fungible-token ledger
pub trait TokenLedger: Send + Sync {
    /// Balance of `token` held by `account`
    fn balance_of(&self, token: &Pubkey, account: &Pubkey) -> Result<u64>;

    /// Move `amount` of `token` from `from` to `to`.
    ///
    /// Returns `Ok(false)` when the token reports failure without erroring.
    fn transfer(&self, token: &Pubkey, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<bool>;
}
