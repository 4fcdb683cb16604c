//! Sweep Forwarder Library
//!
//! A value-forwarding agent: one destination, bound at most once, and two
//! sweeps that move the agent's whole native or token balance to it.

pub mod address;
pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod store;

// Re-export commonly used types
pub use agent::{ForwarderAgent, ForwarderEvent};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{MemoryLedger, NativeLedger, TokenLedger};
