//! Events emitted by the forwarder agent
//!
//! Events are only recorded for operations that succeed, and always carry the
//! exact amount that was swept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::address::as_base58;

/// A successful state change of the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ForwarderEvent {
    /// Destination was bound by `init`
    DestinationBound {
        #[serde(with = "as_base58")]
        destination: Pubkey,
    },

    /// Native balance swept
    EthFlushed {
        #[serde(with = "as_base58")]
        destination: Pubkey,
        amount: u64,
    },

    /// Token balance swept
    Erc20Flushed {
        #[serde(with = "as_base58")]
        token: Pubkey,
        #[serde(with = "as_base58")]
        destination: Pubkey,
        amount: u64,
    },
}

impl std::fmt::Display for ForwarderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwarderEvent::DestinationBound { destination } => {
                write!(f, "DestinationBound({})", destination)
            }
            ForwarderEvent::EthFlushed {
                destination,
                amount,
            } => write!(f, "ETHFlushed({}, {})", destination, amount),
            ForwarderEvent::Erc20Flushed {
                token,
                destination,
                amount,
            } => write!(f, "ERC20Flushed({}, {}, {})", token, destination, amount),
        }
    }
}

/// Event log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event ID
    pub id: String,

    /// When the event was emitted
    pub timestamp: DateTime<Utc>,

    pub event: ForwarderEvent,
}

impl EventRecord {
    pub fn new(event: ForwarderEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_uses_base58() {
        let token = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let event = ForwarderEvent::Erc20Flushed {
            token,
            destination,
            amount: 100,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "erc20_flushed");
        assert_eq!(json["token"], token.to_string());
        assert_eq!(json["destination"], destination.to_string());
        assert_eq!(json["amount"], 100);

        let back: ForwarderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_display() {
        let destination = Pubkey::new_unique();
        let event = ForwarderEvent::EthFlushed {
            destination,
            amount: 1,
        };
        assert_eq!(event.to_string(), format!("ETHFlushed({}, 1)", destination));
    }

    #[test]
    fn test_records_get_unique_ids() {
        let event = ForwarderEvent::DestinationBound {
            destination: Pubkey::new_unique(),
        };
        let a = EventRecord::new(event.clone());
        let b = EventRecord::new(event);
        assert_ne!(a.id, b.id);
    }
}
