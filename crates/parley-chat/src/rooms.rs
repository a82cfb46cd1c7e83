use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

pub type ConnectionId = Uuid;

/// Delivery of room-scoped events to live connections.
///
/// A room is named by a conversation id and holds the connections that joined
/// it. `LocalRooms` keeps membership in process memory; a deployment with
/// several server instances plugs in an implementation backed by a shared
/// pub/sub backplane instead.
pub trait FanOut: Send + Sync {
    /// Register a new live connection and hand back its outbound event stream.
    fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>);

    /// Add `conn` to `room`. Idempotent; returns `true` only on first join.
    fn join(&self, conn: ConnectionId, room: Uuid) -> bool;

    /// Deliver `event` to every member of `room`, the publisher included.
    /// An empty or unknown room is a no-op. Returns the delivery count.
    fn publish(&self, room: Uuid, event: GatewayEvent) -> usize;

    /// Deliver `event` to a single connection.
    fn send_to(&self, conn: ConnectionId, event: GatewayEvent) -> bool;

    /// Drop `conn` from every room it joined.
    fn disconnect(&self, conn: ConnectionId);
}

struct Member {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RoomsInner {
    members: HashMap<ConnectionId, Member>,
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
}

/// Single-instance fan-out over in-memory room membership.
#[derive(Default)]
pub struct LocalRooms {
    inner: RwLock<RoomsInner>,
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_size(&self, room: Uuid) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.rooms.get(&room).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.members.len()
    }
}

impl FanOut for LocalRooms {
    fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.members.insert(
            conn_id,
            Member {
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    fn join(&self, conn: ConnectionId, room: Uuid) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(member) = inner.members.get_mut(&conn) else {
            return false;
        };
        if !member.rooms.insert(room) {
            return false;
        }
        inner.rooms.entry(room).or_default().insert(conn);
        debug!("Connection {} joined room {}", conn, room);
        true
    }

    fn publish(&self, room: Uuid, event: GatewayEvent) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(conns) = inner.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in conns {
            let Some(member) = inner.members.get(conn) else {
                continue;
            };
            // Receiver already gone: the connection is closing, drop the event
            if member.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!("Dropped event for closed connection {}", conn);
            }
        }
        delivered
    }

    fn send_to(&self, conn: ConnectionId, event: GatewayEvent) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .members
            .get(&conn)
            .is_some_and(|member| member.tx.send(event).is_ok())
    }

    fn disconnect(&self, conn: ConnectionId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(member) = inner.members.remove(&conn) else {
            return;
        };
        for room in member.rooms {
            if let Some(conns) = inner.rooms.get_mut(&room) {
                conns.remove(&conn);
                if conns.is_empty() {
                    inner.rooms.remove(&room);
                }
            }
        }
        debug!("Connection {} left all rooms", conn);
    }
}
