//! Frame-stream log-tap broadcast bus (spec.md §4.10): a single producer
//! feeds observation events into a main ring buffer, which a background
//! task fans out to a bounded set of listeners, each with its own
//! drop-oldest ring buffer.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;

const MAIN_RING_CAPACITY: usize = 1024;
const LISTENER_RING_CAPACITY: usize = 100;
const MAX_LISTENERS: usize = 200;

/// Which transport carried the observed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

/// One observed query/response pair, as handed to the bus by the DNS
/// server after each request completes.
#[derive(Debug, Clone)]
pub struct ObservationEvent {
    pub query: Vec<u8>,
    pub response: Vec<u8>,
    pub timestamp_unix_nanos: u128,
    pub protocol: Protocol,
    pub address: SocketAddr,
}

impl ObservationEvent {
    pub fn now(query: Vec<u8>, response: Vec<u8>, protocol: Protocol, address: SocketAddr) -> Self {
        let timestamp_unix_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        ObservationEvent {
            query,
            response,
            timestamp_unix_nanos,
            protocol,
            address,
        }
    }
}

/// A fixed-capacity FIFO that drops its oldest entry rather than blocking
/// the writer when full.
struct DropOldestRing<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> DropOldestRing<T> {
    fn new(capacity: usize) -> Self {
        DropOldestRing {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn push(&self, item: T) {
        let mut items = self.items.lock().expect("ring mutex poisoned");
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock().expect("ring mutex poisoned");
        items.drain(..).collect()
    }
}

struct ListenerEntry {
    ring: Arc<DropOldestRing<ObservationEvent>>,
    notify: Arc<Notify>,
}

/// Holds the live listener set and the slot bitmap that bounds it at 200
/// entries.
struct Inner {
    slots: Mutex<[bool; MAX_LISTENERS]>,
    listeners: Mutex<Vec<Option<ListenerEntry>>>,
    main_ring: DropOldestRing<ObservationEvent>,
    main_notify: Notify,
}

/// The producer-facing handle: publishes events and spawns the fan-out
/// task that drains them to every registered listener.
#[derive(Clone)]
pub struct BroadcastBus {
    inner: Arc<Inner>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            slots: Mutex::new([false; MAX_LISTENERS]),
            listeners: Mutex::new((0..MAX_LISTENERS).map(|_| None).collect()),
            main_ring: DropOldestRing::new(MAIN_RING_CAPACITY),
            main_notify: Notify::new(),
        });
        let bus = BroadcastBus { inner };
        bus.spawn_fanout_task();
        bus
    }

    fn spawn_fanout_task(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                inner.main_notify.notified().await;
                for event in inner.main_ring.drain() {
                    let listeners = inner.listeners.lock().expect("listener table mutex poisoned");
                    for entry in listeners.iter().flatten() {
                        entry.ring.push(event.clone());
                        entry.notify.notify_one();
                    }
                }
            }
        });
    }

    /// Pushes an event into the main ring (drop-oldest when full) and wakes
    /// the fan-out task.
    pub fn publish(&self, event: ObservationEvent) {
        self.inner.main_ring.push(event);
        self.inner.main_notify.notify_one();
    }

    /// Registers a new listener: picks a pseudo-random starting slot and
    /// linearly scans for the first clear bit, wrapping once.
    pub fn register(&self) -> Result<Listener, NoSlotsAvailable> {
        let start = rand::random::<usize>() % MAX_LISTENERS;

        let mut slots = self.inner.slots.lock().expect("slot bitmap mutex poisoned");
        let slot = (0..MAX_LISTENERS)
            .map(|offset| (start + offset) % MAX_LISTENERS)
            .find(|&candidate| !slots[candidate])
            .ok_or(NoSlotsAvailable)?;
        slots[slot] = true;
        drop(slots);

        let ring = Arc::new(DropOldestRing::new(LISTENER_RING_CAPACITY));
        let notify = Arc::new(Notify::new());
        self.inner.listeners.lock().expect("listener table mutex poisoned")[slot] = Some(ListenerEntry {
            ring: ring.clone(),
            notify: notify.clone(),
        });

        Ok(Listener {
            slot,
            ring,
            notify,
            bus: self.inner.clone(),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .expect("slot bitmap mutex poisoned")
            .iter()
            .filter(|&&occupied| occupied)
            .count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        BroadcastBus::new()
    }
}

/// A registered tap: receives every event the bus fans out, via its own
/// bounded ring, until it is dropped — dropping releases its slot.
pub struct Listener {
    slot: usize,
    ring: Arc<DropOldestRing<ObservationEvent>>,
    notify: Arc<Notify>,
    bus: Arc<Inner>,
}

impl Listener {
    /// Pulls every event queued since the last call, oldest first.
    pub fn drain(&self) -> Vec<ObservationEvent> {
        self.ring.drain()
    }

    /// Waits until at least one event is queued.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.bus.slots.lock().expect("slot bitmap mutex poisoned")[self.slot] = false;
        self.bus.listeners.lock().expect("listener table mutex poisoned")[self.slot] = None;
    }
}

#[derive(Debug)]
pub struct NoSlotsAvailable;

impl std::fmt::Display for NoSlotsAvailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no slots left")
    }
}

impl std::error::Error for NoSlotsAvailable {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn sample_event() -> ObservationEvent {
        ObservationEvent::now(
            vec![1, 2, 3],
            vec![4, 5, 6],
            Protocol::Udp,
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5353)),
        )
    }

    #[tokio::test]
    async fn published_event_reaches_registered_listener() {
        let bus = BroadcastBus::new();
        let listener = bus.register().unwrap();

        bus.publish(sample_event());
        listener.notified().await;

        let drained = listener.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].query, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn dropping_a_listener_releases_its_slot() {
        let bus = BroadcastBus::new();
        assert_eq!(bus.listener_count(), 0);
        let listener = bus.register().unwrap();
        assert_eq!(bus.listener_count(), 1);
        drop(listener);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn registration_fails_once_every_slot_is_taken() {
        let bus = BroadcastBus::new();
        let mut held = Vec::new();
        for _ in 0..MAX_LISTENERS {
            held.push(bus.register().unwrap());
        }
        assert!(bus.register().is_err());
    }

    #[test]
    fn drop_oldest_ring_evicts_the_front_when_full() {
        let ring: DropOldestRing<u32> = DropOldestRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.drain(), vec![2, 3]);
    }
}
