//! The forwarder agent
//!
//! Holds one destination, bound at most once, and sweeps whole balances to it.
//! Every sweep reads the balance once, uses that snapshot as both the transfer
//! amount and the event payload, and mutates nothing after the external call.
//! No lock is held across a ledger call, so a recipient calling back into the
//! agent sees the already-debited balance and gets `NothingToFlush`.

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use super::events::{EventRecord, ForwarderEvent};
use crate::address::{as_base58, is_zero};
use crate::error::{Error, Result};
use crate::ledger::{NativeLedger, TokenLedger};

/// Persistable agent state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(with = "as_base58")]
    pub address: Pubkey,

    /// Zero when unbound
    #[serde(with = "as_base58")]
    pub destination: Pubkey,

    #[serde(default)]
    pub events: Vec<EventRecord>,
}

/// Value-forwarding agent
pub struct ForwarderAgent {
    address: Pubkey,
    destination: RwLock<Pubkey>,
    native: Arc<dyn NativeLedger>,
    tokens: Arc<dyn TokenLedger>,
    events: Mutex<Vec<EventRecord>>,
}

impl ForwarderAgent {
    /// Create an agent at `address`. `destination` may be zero (bind later with `init`).
    pub fn new(
        address: Pubkey,
        destination: Pubkey,
        native: Arc<dyn NativeLedger>,
        tokens: Arc<dyn TokenLedger>,
    ) -> Self {
        if is_zero(&destination) {
            info!("Agent {} created without destination", address);
        } else {
            info!("Agent {} created, destination {}", address, destination);
        }

        Self {
            address,
            destination: RwLock::new(destination),
            native,
            tokens,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Restore an agent from a persisted record
    pub fn from_record(
        record: AgentRecord,
        native: Arc<dyn NativeLedger>,
        tokens: Arc<dyn TokenLedger>,
    ) -> Self {
        Self {
            address: record.address,
            destination: RwLock::new(record.destination),
            native,
            tokens,
            events: Mutex::new(record.events),
        }
    }

    /// Snapshot the agent for persistence
    pub fn to_record(&self) -> AgentRecord {
        AgentRecord {
            address: self.address,
            destination: self.destination(),
            events: self.events(),
        }
    }

    /// The agent's own address
    pub fn address(&self) -> Pubkey {
        self.address
    }

    /// Bound destination, or the zero address if unbound
    pub fn destination(&self) -> Pubkey {
        // Pubkey is Copy; a poisoned lock still holds a valid value
        *self.destination.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_bound(&self) -> bool {
        !is_zero(&self.destination())
    }

    /// Emitted events, oldest first
    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bind the destination. Fails once a destination is set, whatever the argument.
    pub fn init(&self, new_destination: Pubkey) -> Result<()> {
        {
            let mut destination = self.destination.write().unwrap_or_else(|e| e.into_inner());

            if !is_zero(&destination) {
                return Err(Error::AlreadyBound);
            }
            if is_zero(&new_destination) {
                return Err(Error::InvalidAddress);
            }

            *destination = new_destination;
        }

        info!("Agent {} bound to {}", self.address, new_destination);
        self.emit(ForwarderEvent::DestinationBound {
            destination: new_destination,
        });
        Ok(())
    }

    /// Sweep the whole native balance to the destination. Returns the amount sent.
    pub fn flush_eth(&self) -> Result<u64> {
        let destination = self.bound_destination()?;

        let amount = self.native.balance(&self.address)?;
        if amount == 0 {
            return Err(Error::NothingToFlush);
        }
        debug!("Flushing {} native units to {}", amount, destination);

        let mark = self.event_count();
        self.native
            .transfer(&self.address, &destination, amount)
            .map_err(|e| {
                warn!("Native flush to {} failed: {}", destination, e);
                self.discard_events_after(mark);
                Error::TransferFailed
            })?;

        info!("ETHFlushed({}, {})", destination, amount);
        self.emit(ForwarderEvent::EthFlushed {
            destination,
            amount,
        });
        Ok(amount)
    }

    /// Sweep the whole balance of `token` to the destination. Returns the amount sent.
    ///
    /// Assumes a conforming token: fee-on-transfer or rebasing mints can leave
    /// the destination credited with less than the event reports.
    pub fn flush_erc20(&self, token: Pubkey) -> Result<u64> {
        let destination = self.bound_destination()?;

        if is_zero(&token) {
            return Err(Error::InvalidTokenAddress);
        }

        let amount = self.tokens.balance_of(&token, &self.address)?;
        if amount == 0 {
            return Err(Error::NothingToFlush);
        }
        debug!("Flushing {} of {} to {}", amount, token, destination);

        let mark = self.event_count();
        let accepted = self
            .tokens
            .transfer(&token, &self.address, &destination, amount)
            .inspect_err(|e| {
                warn!("Token flush of {} failed: {}", token, e);
                self.discard_events_after(mark);
            })?;
        if !accepted {
            warn!("Token {} reported transfer failure", token);
            self.discard_events_after(mark);
            return Err(Error::TokenTransferRejected);
        }

        info!("ERC20Flushed({}, {}, {})", token, destination, amount);
        self.emit(ForwarderEvent::Erc20Flushed {
            token,
            destination,
            amount,
        });
        Ok(amount)
    }

    fn bound_destination(&self) -> Result<Pubkey> {
        let destination = self.destination();
        if is_zero(&destination) {
            return Err(Error::DestinationUnset);
        }
        Ok(destination)
    }

    fn event_count(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop events emitted by nested calls inside a ledger call that was rolled back
    fn discard_events_after(&self, mark: usize) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .truncate(mark);
    }

    fn emit(&self, event: ForwarderEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(EventRecord::new(event));
    }
}

impl std::fmt::Debug for ForwarderAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderAgent")
            .field("address", &self.address)
            .field("destination", &self.destination())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ZERO;
    use crate::ledger::{transfer_hook, MemoryLedger, TokenBehavior};

    fn setup(destination: Pubkey) -> (Arc<MemoryLedger>, Arc<ForwarderAgent>) {
        let ledger = Arc::new(MemoryLedger::new());
        let agent = Arc::new(ForwarderAgent::new(
            Pubkey::new_unique(),
            destination,
            ledger.clone(),
            ledger.clone(),
        ));
        (ledger, agent)
    }

    fn flushed_events(agent: &ForwarderAgent) -> Vec<ForwarderEvent> {
        agent
            .events()
            .into_iter()
            .map(|r| r.event)
            .filter(|e| !matches!(e, ForwarderEvent::DestinationBound { .. }))
            .collect()
    }

    #[test]
    fn test_constructor_sets_destination() {
        let destination = Pubkey::new_unique();
        let (_, agent) = setup(destination);

        assert_eq!(agent.destination(), destination);
        assert!(agent.is_bound());
    }

    #[test]
    fn test_flush_eth_with_zero_balance() {
        let (ledger, agent) = setup(Pubkey::new_unique());

        assert!(matches!(agent.flush_eth(), Err(Error::NothingToFlush)));
        assert!(agent.events().is_empty());
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 0);
    }

    #[test]
    fn test_flush_eth_without_destination() {
        let (ledger, agent) = setup(ZERO);
        ledger.credit(&agent.address(), 1).unwrap();

        assert!(matches!(agent.flush_eth(), Err(Error::DestinationUnset)));
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 1);
    }

    #[test]
    fn test_init_binds_once() {
        let (_, agent) = setup(ZERO);
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());

        agent.init(a).unwrap();
        assert_eq!(agent.destination(), a);

        assert!(matches!(agent.init(b), Err(Error::AlreadyBound)));
        assert!(matches!(agent.init(a), Err(Error::AlreadyBound)));
        assert!(matches!(agent.init(ZERO), Err(Error::AlreadyBound)));
        assert_eq!(agent.destination(), a);

        let events = agent.events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event,
            ForwarderEvent::DestinationBound { destination: a }
        );
    }

    #[test]
    fn test_init_after_constructor_binding() {
        let (_, agent) = setup(Pubkey::new_unique());

        assert!(matches!(
            agent.init(Pubkey::new_unique()),
            Err(Error::AlreadyBound)
        ));
    }

    #[test]
    fn test_init_rejects_zero() {
        let (_, agent) = setup(ZERO);

        assert!(matches!(agent.init(ZERO), Err(Error::InvalidAddress)));
        assert!(!agent.is_bound());

        // Still bindable afterwards
        agent.init(Pubkey::new_unique()).unwrap();
    }

    #[test]
    fn test_flush_eth_sweeps_everything() {
        let destination = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.credit(&destination, 5).unwrap();
        ledger.credit(&agent.address(), 1_000_000_000).unwrap();

        assert_eq!(agent.flush_eth().unwrap(), 1_000_000_000);

        assert_eq!(ledger.balance(&agent.address()).unwrap(), 0);
        assert_eq!(ledger.balance(&destination).unwrap(), 1_000_000_005);
        assert_eq!(
            flushed_events(&agent),
            vec![ForwarderEvent::EthFlushed {
                destination,
                amount: 1_000_000_000
            }]
        );
    }

    #[test]
    fn test_flush_eth_after_init() {
        let (ledger, agent) = setup(ZERO);
        let destination = Pubkey::new_unique();
        ledger.credit(&agent.address(), 3).unwrap();

        agent.init(destination).unwrap();
        agent.flush_eth().unwrap();

        assert_eq!(ledger.balance(&destination).unwrap(), 3);
    }

    #[test]
    fn test_flush_eth_rejected_by_destination() {
        let destination = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.set_rejecting(&destination, true).unwrap();
        ledger.credit(&agent.address(), 1).unwrap();

        assert!(matches!(agent.flush_eth(), Err(Error::TransferFailed)));
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 1);
        assert_eq!(ledger.balance(&destination).unwrap(), 0);
        assert!(agent.events().is_empty());

        // Retry succeeds once the destination accepts value
        ledger.set_rejecting(&destination, false).unwrap();
        assert_eq!(agent.flush_eth().unwrap(), 1);
    }

    #[test]
    fn test_reentrant_flush_eth_sends_once() {
        let destination = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.credit(&agent.address(), 100).unwrap();

        let reentry_results = Arc::new(Mutex::new(Vec::new()));
        let (inner_agent, results) = (agent.clone(), reentry_results.clone());
        ledger
            .set_receive_hook(
                &destination,
                transfer_hook(move |_, _, _| {
                    let result = inner_agent.flush_eth();
                    results.lock().unwrap().push(result.map_err(|e| e.to_string()));
                    Ok(())
                }),
            )
            .unwrap();

        assert_eq!(agent.flush_eth().unwrap(), 100);

        let results = reentry_results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap_err(),
            &Error::NothingToFlush.to_string()
        );
        assert_eq!(ledger.balance(&destination).unwrap(), 100);
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 0);
        assert_eq!(flushed_events(&agent).len(), 1);
    }

    #[test]
    fn test_reentrant_failure_reverts_whole_flush() {
        let destination = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.credit(&agent.address(), 100).unwrap();

        // Destination propagates the reentrant failure, reverting its receipt
        let inner_agent = agent.clone();
        ledger
            .set_receive_hook(
                &destination,
                transfer_hook(move |_, _, _| {
                    inner_agent.flush_eth().map(|_| ())
                }),
            )
            .unwrap();

        assert!(matches!(agent.flush_eth(), Err(Error::TransferFailed)));
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 100);
        assert_eq!(ledger.balance(&destination).unwrap(), 0);
        assert!(agent.events().is_empty());
    }

    #[test]
    fn test_flush_erc20_sweeps_everything() {
        let destination = Pubkey::new_unique();
        let token = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.mint_tokens(&token, &destination, 10).unwrap();
        ledger.mint_tokens(&token, &agent.address(), 100).unwrap();

        assert_eq!(agent.flush_erc20(token).unwrap(), 100);

        assert_eq!(ledger.balance_of(&token, &agent.address()).unwrap(), 0);
        assert_eq!(ledger.balance_of(&token, &destination).unwrap(), 110);
        assert_eq!(
            flushed_events(&agent),
            vec![ForwarderEvent::Erc20Flushed {
                token,
                destination,
                amount: 100
            }]
        );
    }

    #[test]
    fn test_flush_erc20_leaves_other_tokens() {
        let destination = Pubkey::new_unique();
        let (token, other) = (Pubkey::new_unique(), Pubkey::new_unique());
        let (ledger, agent) = setup(destination);
        ledger.mint_tokens(&token, &agent.address(), 5).unwrap();
        ledger.mint_tokens(&other, &agent.address(), 9).unwrap();
        ledger.credit(&agent.address(), 4).unwrap();

        agent.flush_erc20(token).unwrap();

        assert_eq!(ledger.balance_of(&other, &agent.address()).unwrap(), 9);
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 4);
    }

    #[test]
    fn test_flush_erc20_validation_order() {
        let (ledger, agent) = setup(ZERO);
        let token = Pubkey::new_unique();
        ledger.mint_tokens(&token, &agent.address(), 1).unwrap();

        assert!(matches!(agent.flush_erc20(ZERO), Err(Error::DestinationUnset)));
        assert!(matches!(agent.flush_erc20(token), Err(Error::DestinationUnset)));

        agent.init(Pubkey::new_unique()).unwrap();
        assert!(matches!(
            agent.flush_erc20(ZERO),
            Err(Error::InvalidTokenAddress)
        ));
        assert!(matches!(
            agent.flush_erc20(Pubkey::new_unique()),
            Err(Error::NothingToFlush)
        ));
        assert_eq!(flushed_events(&agent).len(), 0);
    }

    #[test]
    fn test_flush_erc20_propagates_token_failure() {
        let destination = Pubkey::new_unique();
        let token = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.mint_tokens(&token, &agent.address(), 50).unwrap();

        ledger
            .set_token_behavior(&token, TokenBehavior::Reverts("token paused".into()))
            .unwrap();
        assert!(matches!(
            agent.flush_erc20(token),
            Err(Error::TokenTransfer(reason)) if reason == "token paused"
        ));

        ledger
            .set_token_behavior(&token, TokenBehavior::ReturnsFalse)
            .unwrap();
        assert!(matches!(
            agent.flush_erc20(token),
            Err(Error::TokenTransferRejected)
        ));

        assert_eq!(ledger.balance_of(&token, &agent.address()).unwrap(), 50);
        assert!(agent.events().is_empty());
    }

    #[test]
    fn test_reentrant_flush_erc20_sends_once() {
        let destination = Pubkey::new_unique();
        let token = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.mint_tokens(&token, &agent.address(), 100).unwrap();

        let reentered = Arc::new(Mutex::new(None));
        let (inner_agent, slot) = (agent.clone(), reentered.clone());
        ledger
            .set_token_hook(
                &token,
                transfer_hook(move |_, _, _| {
                    *slot.lock().unwrap() = Some(inner_agent.flush_erc20(token).map_err(|e| e.to_string()));
                    Ok(())
                }),
            )
            .unwrap();

        assert_eq!(agent.flush_erc20(token).unwrap(), 100);

        assert_eq!(
            *reentered.lock().unwrap(),
            Some(Err(Error::NothingToFlush.to_string()))
        );
        assert_eq!(ledger.balance_of(&token, &destination).unwrap(), 100);
        assert_eq!(flushed_events(&agent).len(), 1);
    }

    #[test]
    fn test_failed_flush_eth_drops_nested_sweep_event() {
        let destination = Pubkey::new_unique();
        let token = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.credit(&agent.address(), 1).unwrap();
        ledger.mint_tokens(&token, &agent.address(), 100).unwrap();

        // Destination sweeps the token, then reverts its own receipt
        let inner_agent = agent.clone();
        ledger
            .set_receive_hook(
                &destination,
                transfer_hook(move |_, _, _| {
                    inner_agent.flush_erc20(token)?;
                    Err(Error::Internal("out of gas".into()))
                }),
            )
            .unwrap();

        assert!(matches!(agent.flush_eth(), Err(Error::TransferFailed)));
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 1);
        assert_eq!(ledger.balance_of(&token, &agent.address()).unwrap(), 100);
        assert_eq!(ledger.balance_of(&token, &destination).unwrap(), 0);
        assert!(agent.events().is_empty());
    }

    #[test]
    fn test_failed_flush_erc20_drops_nested_sweep_event() {
        let destination = Pubkey::new_unique();
        let token = Pubkey::new_unique();
        let (ledger, agent) = setup(destination);
        ledger.credit(&agent.address(), 7).unwrap();
        ledger.mint_tokens(&token, &agent.address(), 100).unwrap();

        let inner_agent = agent.clone();
        ledger
            .set_token_hook(
                &token,
                transfer_hook(move |_, _, _| {
                    inner_agent.flush_eth()?;
                    Err(Error::Internal("token paused".into()))
                }),
            )
            .unwrap();

        assert!(matches!(
            agent.flush_erc20(token),
            Err(Error::TokenTransfer(reason)) if reason.contains("token paused")
        ));
        assert_eq!(ledger.balance(&agent.address()).unwrap(), 7);
        assert_eq!(ledger.balance(&destination).unwrap(), 0);
        assert_eq!(ledger.balance_of(&token, &agent.address()).unwrap(), 100);
        assert!(agent.events().is_empty());
    }

    #[test]
    fn test_record_roundtrip_keeps_binding() {
        let (ledger, agent) = setup(ZERO);
        let destination = Pubkey::new_unique();
        agent.init(destination).unwrap();

        let record = agent.to_record();
        let restored = ForwarderAgent::from_record(record, ledger.clone(), ledger);

        assert_eq!(restored.address(), agent.address());
        assert!(matches!(
            restored.init(Pubkey::new_unique()),
            Err(Error::AlreadyBound)
        ));
        assert_eq!(restored.events().len(), 1);
    }
}
