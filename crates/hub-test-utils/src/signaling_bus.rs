//! In-memory signaling between two peer managers.
//!
//! Stands in for the hub relay: signals one side's links emit are handed
//! to the other side's manager as the matching server event. Signals can
//! be held back by kind to force out-of-order delivery, or dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut a = Endpoint::new(manager_a, signals_a);
//! let mut b = Endpoint::new(manager_b, signals_b);
//! let mut bus = SignalingBus::new().hold("answer");
//!
//! bus.pump(&mut a, &mut b).await;     // offer + candidates delivered
//! bus.release_held(&mut a, &mut b).await; // answer delivered last
//! ```

use common::types::{ConnectionId, RoomId, UserId};
use room_client::config::PeerConfig;
use room_client::peer::{MediaEngine, OutboundSignal, PeerManager, SharedCapture};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Yields between delivery rounds, letting link tasks run.
const SETTLE_YIELDS: usize = 32;

/// One side of the bus.
pub struct Endpoint {
    pub manager: PeerManager,
    signals: mpsc::UnboundedReceiver<OutboundSignal>,
}

impl Endpoint {
    #[must_use]
    pub fn new(manager: PeerManager, signals: mpsc::UnboundedReceiver<OutboundSignal>) -> Self {
        Self { manager, signals }
    }

    /// Manager for `connection` (owned by `user`) in room `R1`.
    #[must_use]
    pub fn create(
        connection: &str,
        user: &str,
        engine: Arc<dyn MediaEngine>,
        capture: &SharedCapture,
        config: PeerConfig,
    ) -> Self {
        let (manager, signals) = PeerManager::new(
            RoomId::from("R1"),
            ConnectionId::from(connection),
            UserId::from(user),
            engine,
            capture,
            config,
        );
        Self::new(manager, signals)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.manager.local().clone()
    }
}

/// A signal that crossed the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub from: ConnectionId,
    pub to: ConnectionId,
    pub kind: &'static str,
}

/// Relay between two endpoints.
#[derive(Debug, Default)]
pub struct SignalingBus {
    held_kinds: HashSet<&'static str>,
    dropped_kinds: HashSet<&'static str>,
    held: Vec<(ConnectionId, OutboundSignal)>,
    delivered: Vec<Delivered>,
    dropped: usize,
}

impl SignalingBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold signals of `kind` (e.g. `"answer"`) until `release_held`.
    #[must_use]
    pub fn hold(mut self, kind: &'static str) -> Self {
        self.held_kinds.insert(kind);
        self
    }

    /// Silently drop signals of `kind`.
    pub fn drop_kind(&mut self, kind: &'static str) {
        self.dropped_kinds.insert(kind);
    }

    /// Stop dropping and holding anything.
    pub fn heal(&mut self) {
        self.dropped_kinds.clear();
        self.held_kinds.clear();
    }

    /// Everything delivered so far.
    #[must_use]
    pub fn delivered(&self) -> &[Delivered] {
        &self.delivered
    }

    /// Signals of `kind` delivered from `from`.
    #[must_use]
    pub fn count(&self, from: &ConnectionId, kind: &str) -> usize {
        self.delivered
            .iter()
            .filter(|d| &d.from == from && d.kind == kind)
            .count()
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Deliver signals in both directions until nothing moves.
    ///
    /// Returns the number of signals delivered.
    pub async fn pump(&mut self, a: &mut Endpoint, b: &mut Endpoint) -> usize {
        let mut total = 0;
        loop {
            settle().await;
            let moved = self.drain(a, b).await + self.drain(b, a).await;
            if moved == 0 {
                return total;
            }
            total += moved;
        }
    }

    /// Deliver held signals in the order they were emitted, then pump.
    pub async fn release_held(&mut self, a: &mut Endpoint, b: &mut Endpoint) -> usize {
        self.held_kinds.clear();
        let a_id = a.id();
        let mut total = 0;
        for (from, signal) in std::mem::take(&mut self.held) {
            if from == a_id {
                self.deliver(from, signal, b).await;
            } else {
                self.deliver(from, signal, a).await;
            }
            total += 1;
        }
        total + self.pump(a, b).await
    }

    async fn drain(&mut self, from: &mut Endpoint, to: &mut Endpoint) -> usize {
        let from_id = from.id();
        let to_id = to.id();
        let mut moved = 0;
        while let Ok(signal) = from.signals.try_recv() {
            moved += 1;
            let kind = signal.signal.name();
            if signal.target != to_id || self.dropped_kinds.contains(kind) {
                self.dropped += 1;
                continue;
            }
            if self.held_kinds.contains(kind) {
                self.held.push((from_id.clone(), signal));
                continue;
            }
            self.deliver(from_id.clone(), signal, to).await;
        }
        moved
    }

    async fn deliver(&mut self, from: ConnectionId, signal: OutboundSignal, to: &mut Endpoint) {
        self.delivered.push(Delivered {
            from: from.clone(),
            to: to.id(),
            kind: signal.signal.name(),
        });
        to.manager.handle_event(signal.into_server_event(from)).await;
    }
}

/// Let spawned link tasks run until they block.
pub async fn settle() {
    for _ in 0..SETTLE_YIELDS {
        tokio::task::yield_now().await;
    }
}
