//! Listener registries and the server-wide event bus

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::net::EndpointId;

use super::element::ElementId;

/// Handle returned by [`Listeners::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerState<T> {
    next_id: u64,
    closed: bool,
    entries: Vec<(SubscriptionId, Callback<T>)>,
}

/// Insertion-ordered callback list.
///
/// Emission works on a snapshot of the current subscribers, so a callback may
/// subscribe or unsubscribe without deadlocking; such changes apply from the
/// next emission on.
pub struct Listeners<T> {
    state: Mutex<ListenerState<T>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListenerState {
                next_id: 0,
                closed: false,
                entries: Vec::new(),
            }),
        }
    }

    /// Register a callback. Returns `None` once the registry was closed.
    pub fn subscribe<F>(&self, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.entries.push((id, Arc::new(callback)));
        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|(sub, _)| *sub != id);
        state.entries.len() != before
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = {
            let state = self.state.lock();
            state.entries.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in snapshot {
            callback(value);
        }
    }

    /// Refuse further subscriptions and deliver `value` one final time.
    /// Returns false if the registry had already been closed.
    pub fn close_and_emit(&self, value: &T) -> bool {
        let snapshot: Vec<Callback<T>> = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.entries.drain(..).map(|(_, cb)| cb).collect()
        };
        for callback in snapshot {
            callback(value);
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a client left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    Quit,
    Timeout,
}

/// Events raised by the synchronization core for outside collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ClientConnected {
        endpoint: EndpointId,
        player: ElementId,
    },
    ClientDisconnected {
        endpoint: EndpointId,
        player: ElementId,
        reason: QuitReason,
    },
    PlayerDamaged {
        player: ElementId,
        /// `None` when the damager no longer exists
        damager: Option<ElementId>,
        weapon: u8,
        body_part: u8,
    },
    PlayerCommand {
        player: ElementId,
        command: String,
        arguments: Vec<String>,
    },
    ColShapeEntered {
        shape: ElementId,
        element: ElementId,
    },
    ColShapeLeft {
        shape: ElementId,
        element: ElementId,
    },
    PolygonPointChanged {
        shape: ElementId,
        index: usize,
    },
}

/// Broadcast channel carrying [`WorldEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorldEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with no subscribers is not an error
    pub fn publish(&self, event: WorldEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
