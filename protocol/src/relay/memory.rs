//! In-process relay.
//!
//! Holds a FIFO queue of packets for every ledger registered with it. The
//! node's router task drains the queue into ledger actors; tests drain it by
//! hand, which lets them delay, drop, duplicate or reorder deliveries.
//!
//! A packet the destination refuses for a reason that may clear later is
//! handed back with [`InMemoryRelay::store`]. Its path is then blocked:
//! later packets on it are stored behind it rather than delivered out of
//! order. [`InMemoryRelay::retry_stored`] puts everything stored back at
//! the head of the queue in nonce order.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{
    AdapterParams, Airdrop, DispatchOptions, DispatchReceipt, DispatchRequest, Packet, Relay,
    RelayError,
};
use crate::config::{RelayFeeSchedule, MAX_STORED_PACKETS_PER_PATH};
use crate::types::{Address, Amount, LedgerId};

/// `(source ledger, sender, destination ledger, receiver)`.
type Path = (LedgerId, Address, LedgerId, Address);

#[derive(Debug, Default)]
struct RelayState {
    ledgers: HashSet<LedgerId>,
    outbound_nonces: HashMap<Path, u64>,
    queue: VecDeque<Packet>,
    stored: HashMap<Path, BTreeMap<u64, Packet>>,
    fees_collected: Amount,
    dispatched: u64,
    requeued: u64,
}

fn path_of(packet: &Packet) -> Path {
    (
        packet.src_ledger,
        packet.src_address,
        packet.dest_ledger,
        packet.dest_address,
    )
}

/// Queue-backed relay living in the same process as the ledgers.
#[derive(Debug)]
pub struct InMemoryRelay {
    schedule: RelayFeeSchedule,
    state: Mutex<RelayState>,
    ready: Notify,
}

impl InMemoryRelay {
    /// Creates a relay with the given fee schedule and no ledgers.
    pub fn new(schedule: RelayFeeSchedule) -> Self {
        Self {
            schedule,
            state: Mutex::new(RelayState::default()),
            ready: Notify::new(),
        }
    }

    /// Makes `ledger_id` a valid destination.
    pub fn register_ledger(&self, ledger_id: LedgerId) {
        self.state.lock().ledgers.insert(ledger_id);
        info!(ledger_id, "ledger registered with relay");
    }

    /// The fee schedule in force.
    pub fn schedule(&self) -> &RelayFeeSchedule {
        &self.schedule
    }

    /// Number of packets waiting for delivery.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Total fees kept by the relay.
    pub fn fees_collected(&self) -> Amount {
        self.state.lock().fees_collected
    }

    /// Total packets accepted since creation.
    pub fn dispatched(&self) -> u64 {
        self.state.lock().dispatched
    }

    /// Pops the oldest queued packet.
    pub fn next_packet(&self) -> Option<Packet> {
        self.state.lock().queue.pop_front()
    }

    /// Packets queued since creation, first deliveries and retries alike.
    pub fn enqueued(&self) -> u64 {
        let state = self.state.lock();
        state.dispatched + state.requeued
    }

    /// Packets waiting in storage for redelivery.
    pub fn stored(&self) -> usize {
        self.state.lock().stored.values().map(BTreeMap::len).sum()
    }

    /// Whether `packet`'s path has stored packets ahead of it.
    pub fn is_blocked(&self, packet: &Packet) -> bool {
        self.state.lock().stored.contains_key(&path_of(packet))
    }

    /// Keeps a refused packet for redelivery. Returns `false`, dropping
    /// the packet, when its path already holds the maximum.
    pub fn store(&self, packet: Packet, reason: &str) -> bool {
        let mut state = self.state.lock();
        let stored = state.stored.entry(path_of(&packet)).or_default();
        if stored.len() >= MAX_STORED_PACKETS_PER_PATH && !stored.contains_key(&packet.nonce) {
            warn!(packet = %packet.id_hex(), reason, "stored packet limit reached, packet dropped");
            return false;
        }
        info!(
            packet = %packet.id_hex(),
            src = packet.src_ledger,
            dest = packet.dest_ledger,
            nonce = packet.nonce,
            reason,
            "packet stored for retry"
        );
        stored.insert(packet.nonce, packet);
        true
    }

    /// Moves every stored packet back to the head of the queue, each path
    /// in nonce order. Returns how many were requeued.
    pub fn retry_stored(&self) -> usize {
        let mut state = self.state.lock();
        let stored = std::mem::take(&mut state.stored);
        let mut packets: Vec<Packet> = stored.into_values().flat_map(BTreeMap::into_values).collect();
        packets.sort_by_key(|p| (p.src_ledger, p.dest_ledger, p.nonce));
        let count = packets.len();
        for packet in packets.into_iter().rev() {
            state.queue.push_front(packet);
        }
        state.requeued += count as u64;
        drop(state);
        if count > 0 {
            debug!(count, "stored packets requeued");
            self.ready.notify_one();
        }
        count
    }

    /// Removes and returns every queued packet, oldest first.
    pub fn drain(&self) -> Vec<Packet> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Resolves once at least one packet has been queued since the last
    /// wake-up. A dispatch that happens before anyone waits is not lost.
    pub async fn packet_ready(&self) {
        self.ready.notified().await;
    }

    fn parse_params(&self, options: &DispatchOptions) -> Result<AdapterParams, RelayError> {
        if !options.zro_payment_address.is_zero() {
            return Err(RelayError::UnsupportedPaymentCurrency(
                options.zro_payment_address,
            ));
        }
        AdapterParams::decode(&options.adapter_params)
    }

    fn price(&self, payload: &[u8], params: &AdapterParams) -> Amount {
        let gas_limit = params.gas_limit(self.schedule.default_gas_limit);
        let airdrop = params.airdrop().map(|(_, amount)| amount).unwrap_or(0);
        self.schedule
            .base_fee
            .saturating_add(self.schedule.fee_per_byte.saturating_mul(payload.len() as u64))
            .saturating_add(self.schedule.gas_price.saturating_mul(gas_limit))
            .saturating_add(airdrop)
    }
}

impl Relay for InMemoryRelay {
    fn quote(
        &self,
        dest_ledger: LedgerId,
        payload: &[u8],
        options: &DispatchOptions,
    ) -> Result<Amount, RelayError> {
        if !self.state.lock().ledgers.contains(&dest_ledger) {
            return Err(RelayError::UnknownDestination(dest_ledger));
        }
        let params = self.parse_params(options)?;
        let fee = self.price(payload, &params);
        debug!(dest_ledger, payload_len = payload.len(), fee, "relay quote");
        Ok(fee)
    }

    fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReceipt, RelayError> {
        let params = self.parse_params(&request.options)?;
        let fee = self.price(&request.payload, &params);

        let mut state = self.state.lock();
        if !state.ledgers.contains(&request.dest_ledger) {
            return Err(RelayError::UnknownDestination(request.dest_ledger));
        }
        if request.value < fee {
            return Err(RelayError::InsufficientFee {
                required: fee,
                provided: request.value,
            });
        }

        let path = (
            request.src_ledger,
            request.src_address,
            request.dest_ledger,
            request.dest_address,
        );
        let nonce = {
            let counter = state.outbound_nonces.entry(path).or_insert(0);
            *counter += 1;
            *counter
        };

        let packet = Packet {
            src_ledger: request.src_ledger,
            src_address: request.src_address,
            dest_ledger: request.dest_ledger,
            dest_address: request.dest_address,
            nonce,
            payload: request.payload,
            gas_limit: params.gas_limit(self.schedule.default_gas_limit),
            airdrop: params
                .airdrop()
                .map(|(recipient, amount)| Airdrop { recipient, amount }),
        };

        info!(
            packet = %packet.id_hex(),
            src = packet.src_ledger,
            dest = packet.dest_ledger,
            nonce,
            fee,
            "packet queued"
        );

        state.queue.push_back(packet);
        state.fees_collected = state.fees_collected.saturating_add(fee);
        state.dispatched += 1;
        drop(state);
        self.ready.notify_one();

        Ok(DispatchReceipt {
            nonce,
            fee,
            refund: request.value - fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> InMemoryRelay {
        let relay = InMemoryRelay::new(RelayFeeSchedule::default());
        relay.register_ledger(1);
        relay.register_ledger(2);
        relay
    }

    fn request(value: Amount, options: DispatchOptions) -> DispatchRequest {
        DispatchRequest {
            src_ledger: 1,
            src_address: Address::derive("src"),
            dest_ledger: 2,
            dest_address: Address::derive("dst"),
            payload: vec![0u8; 10],
            options,
            value,
        }
    }

    fn opts() -> DispatchOptions {
        DispatchOptions::refund_to(Address::derive("alice"))
    }

    #[test]
    fn quote_follows_schedule() {
        let relay = relay();
        let s = RelayFeeSchedule::default();
        let fee = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        assert_eq!(
            fee,
            s.base_fee + 10 * s.fee_per_byte + s.default_gas_limit * s.gas_price
        );
    }

    #[test]
    fn airdrop_is_priced_in() {
        let relay = relay();
        let plain = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        let airdrop = opts().with_adapter_params(AdapterParams::Airdrop {
            gas_limit: RelayFeeSchedule::default().default_gas_limit,
            amount: 5_000,
            recipient: Address::derive("dst"),
        });
        assert_eq!(relay.quote(2, &[0u8; 10], &airdrop).unwrap(), plain + 5_000);
    }

    #[test]
    fn nonces_increase_per_path() {
        let relay = relay();
        let fee = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        let r1 = relay.dispatch(request(fee, opts())).unwrap();
        let r2 = relay.dispatch(request(fee + 7, opts())).unwrap();
        assert_eq!((r1.nonce, r2.nonce), (1, 2));
        assert_eq!(r2.refund, 7);
        assert_eq!(relay.pending(), 2);
        assert_eq!(relay.fees_collected(), fee * 2);

        let packets = relay.drain();
        assert_eq!(packets[0].nonce, 1);
        assert_eq!(packets[1].nonce, 2);
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn nonces_restart_for_a_new_receiver() {
        let relay = relay();
        let fee = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        relay.dispatch(request(fee, opts())).unwrap();
        relay.dispatch(request(fee, opts())).unwrap();

        let mut moved = request(fee, opts());
        moved.dest_address = Address::derive("dst-v2");
        assert_eq!(relay.dispatch(moved).unwrap().nonce, 1);
        assert_eq!(relay.dispatch(request(fee, opts())).unwrap().nonce, 3);
    }

    #[test]
    fn underpaid_dispatch_rejected_without_side_effects() {
        let relay = relay();
        let err = relay.dispatch(request(1, opts())).unwrap_err();
        assert!(matches!(err, RelayError::InsufficientFee { provided: 1, .. }));
        assert_eq!(relay.pending(), 0);
        assert_eq!(relay.dispatched(), 0);
    }

    #[test]
    fn unknown_destination_rejected() {
        let relay = relay();
        assert_eq!(
            relay.quote(99, &[], &opts()),
            Err(RelayError::UnknownDestination(99))
        );
    }

    #[test]
    fn zro_payment_rejected() {
        let relay = relay();
        let mut options = opts();
        options.zro_payment_address = Address::derive("zro");
        assert!(matches!(
            relay.quote(2, &[], &options),
            Err(RelayError::UnsupportedPaymentCurrency(_))
        ));
    }

    #[test]
    fn stored_packets_block_their_path_and_retry_in_order() {
        let relay = relay();
        let fee = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        for _ in 0..3 {
            relay.dispatch(request(fee, opts())).unwrap();
        }
        let first = relay.next_packet().unwrap();
        assert!(!relay.is_blocked(&first));

        assert!(relay.store(first, "untrusted source"));
        let second = relay.next_packet().unwrap();
        assert!(relay.is_blocked(&second));
        assert!(relay.store(second, "path blocked"));
        assert_eq!(relay.stored(), 2);
        assert_eq!(relay.pending(), 1);

        assert_eq!(relay.retry_stored(), 2);
        assert_eq!(relay.stored(), 0);
        let nonces: Vec<u64> = relay.drain().iter().map(|p| p.nonce).collect();
        assert_eq!(nonces, [1, 2, 3]);
        assert_eq!(relay.dispatched(), 3);
        assert_eq!(relay.enqueued(), 5);
    }

    #[test]
    fn store_is_bounded_per_path() {
        let relay = relay();
        let fee = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        for _ in 0..=MAX_STORED_PACKETS_PER_PATH {
            relay.dispatch(request(fee, opts())).unwrap();
        }
        let kept = relay
            .drain()
            .into_iter()
            .filter(|packet| relay.store(packet.clone(), "untrusted source"))
            .count();
        assert_eq!(kept, MAX_STORED_PACKETS_PER_PATH);
        assert_eq!(relay.stored(), MAX_STORED_PACKETS_PER_PATH);
    }

    #[tokio::test]
    async fn packet_ready_fires_after_dispatch() {
        let relay = relay();
        let fee = relay.quote(2, &[0u8; 10], &opts()).unwrap();
        relay.dispatch(request(fee, opts())).unwrap();
        // Permit was stored before anyone waited.
        relay.packet_ready().await;
        assert!(relay.next_packet().is_some());
    }
}
