//! # Peer Registry
//!
//! Maps each remote ledger id to the one bridge address trusted there.
//! Outbound messages need a registered destination, and inbound messages
//! need an exact `(ledger, sender)` match. Mutation goes through the
//! executor-gated `set_peer` / `remove_peer` on [`crate::BridgeLedger`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use omniwrap_protocol::{Address, LedgerId};

use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::ledger::BridgeLedger;

/// A trusted counterpart on another ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub remote_ledger_id: LedgerId,
    pub trusted_remote_address: Address,
}

/// At most one trusted address per remote ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerRegistry {
    peers: BTreeMap<LedgerId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the trusted address for `remote_ledger_id`.
    /// Returns the entry it replaced.
    pub fn set(&mut self, remote_ledger_id: LedgerId, remote_address: Address) -> Option<Peer> {
        self.peers.insert(
            remote_ledger_id,
            Peer {
                remote_ledger_id,
                trusted_remote_address: remote_address,
            },
        )
    }

    pub fn remove(&mut self, remote_ledger_id: LedgerId) -> Option<Peer> {
        self.peers.remove(&remote_ledger_id)
    }

    pub fn get(&self, remote_ledger_id: LedgerId) -> Option<&Peer> {
        self.peers.get(&remote_ledger_id)
    }

    /// True iff `sender` is the registered address for `remote_ledger_id`.
    pub fn is_trusted(&self, remote_ledger_id: LedgerId, sender: &Address) -> bool {
        self.peers
            .get(&remote_ledger_id)
            .is_some_and(|p| p.trusted_remote_address == *sender)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers in ledger-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}

// ---------------------------------------------------------------------------
// Gated mutation
// ---------------------------------------------------------------------------

impl BridgeLedger {
    /// Trusts `remote_address` on `remote_ledger_id`, replacing any earlier
    /// entry. Executor only.
    pub fn set_peer(
        &mut self,
        caller: &Address,
        remote_ledger_id: LedgerId,
        remote_address: Address,
    ) -> Result<(), BridgeError> {
        self.authorize(caller)?;
        let previous = self.peers.set(remote_ledger_id, remote_address);
        info!(
            ledger = self.ledger_id,
            remote_ledger_id,
            remote = %remote_address,
            replaced = previous.is_some(),
            "peer set"
        );
        self.emit(BridgeEvent::PeerSet {
            remote_ledger_id,
            remote_address,
        });
        Ok(())
    }

    /// Stops trusting `remote_ledger_id`. Messages already in flight from
    /// it will be rejected on arrival. Executor only; removing an absent
    /// peer is a no-op.
    pub fn remove_peer(
        &mut self,
        caller: &Address,
        remote_ledger_id: LedgerId,
    ) -> Result<(), BridgeError> {
        self.authorize(caller)?;
        if self.peers.remove(remote_ledger_id).is_some() {
            info!(ledger = self.ledger_id, remote_ledger_id, "peer removed");
            self.emit(BridgeEvent::PeerRemoved { remote_ledger_id });
        }
        Ok(())
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_previous_entry() {
        let mut registry = PeerRegistry::new();
        let a = Address::derive("a");
        let b = Address::derive("b");

        assert!(registry.set(10, a).is_none());
        assert!(registry.is_trusted(10, &a));

        let old = registry.set(10, b).unwrap();
        assert_eq!(old.trusted_remote_address, a);
        assert!(!registry.is_trusted(10, &a));
        assert!(registry.is_trusted(10, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn trust_requires_exact_pair() {
        let mut registry = PeerRegistry::new();
        let a = Address::derive("a");
        registry.set(10, a);
        assert!(!registry.is_trusted(11, &a));
        assert!(!registry.is_trusted(10, &Address::derive("other")));
    }

    #[test]
    fn remove_revokes_trust() {
        let mut registry = PeerRegistry::new();
        let a = Address::derive("a");
        registry.set(10, a);
        assert!(registry.remove(10).is_some());
        assert!(registry.remove(10).is_none());
        assert!(!registry.is_trusted(10, &a));
        assert!(registry.is_empty());
    }
}
