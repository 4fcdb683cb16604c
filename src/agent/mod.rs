//! Forwarder agent
//!
//! A single destination plus two sweeps:
//!
//! ```text
//!            init(dest)
//!  Unbound ─────────────> Bound (terminal)
//!
//!  flush_eth / flush_erc20: callable in both states, succeed only when Bound
//! ```

pub mod events;
pub mod forwarder;

pub use events::{EventRecord, ForwarderEvent};
pub use forwarder::{AgentRecord, ForwarderAgent};
