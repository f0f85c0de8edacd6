//! Room membership and fan-out.
//!
//! A room is keyed by session id and maps to the set of member connections.
//! Members are held as `Weak` references so the registry never extends a
//! connection's lifetime; a member whose connection is gone is skipped on
//! broadcast and pruned when the room is next modified. A reverse index from connection to
//! rooms makes disconnect cleanup proportional to that connection's rooms.

use super::connection::{Connection, ConnectionHandle};
use super::protocol::ServerEvent;
use crate::errors::RelayError;
use crate::observability::metrics;

use common::types::ConnectionId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::debug;

#[derive(Debug, Default)]
struct Rooms {
    /// Room id to members.
    members: HashMap<String, HashMap<ConnectionId, Weak<Connection>>>,
    /// Connection to the rooms it belongs to.
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

/// Thread-safe room membership registry.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: RwLock<Rooms>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to `room`. Returns `false` if it was already a member.
    pub fn join(&self, room: &str, conn: &ConnectionHandle) -> bool {
        let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let inserted = rooms
            .members
            .entry(room.to_string())
            .or_default()
            .insert(conn.id(), Arc::downgrade(conn))
            .is_none();
        rooms
            .memberships
            .entry(conn.id())
            .or_default()
            .insert(room.to_string());
        inserted
    }

    /// Remove `conn` from every room it belongs to, returning those rooms.
    pub fn leave_all(&self, conn: ConnectionId) -> Vec<String> {
        let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(joined) = rooms.memberships.remove(&conn) else {
            return Vec::new();
        };
        for room in &joined {
            remove_member(&mut rooms.members, room, conn);
        }
        let mut left: Vec<String> = joined.into_iter().collect();
        left.sort();
        left
    }

    /// Whether `conn` is a member of `room`.
    #[must_use]
    pub fn is_member(&self, room: &str, conn: ConnectionId) -> bool {
        let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        rooms
            .members
            .get(room)
            .is_some_and(|members| members.contains_key(&conn))
    }

    /// Number of non-empty rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        rooms.members.len()
    }

    /// Deliver `event` to every live member of `room` except `except`.
    ///
    /// Handles are collected under the read lock and delivered after it is
    /// released. Delivery never blocks; a full or closed queue is logged and
    /// counted, and does not affect other recipients. Returns the number of
    /// members the event was enqueued for.
    pub fn broadcast(
        &self,
        room: &str,
        except: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let recipients: Vec<ConnectionHandle> = {
            let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let Some(members) = rooms.members.get(room) else {
                return 0;
            };
            members
                .iter()
                .filter(|(id, _)| Some(**id) != except)
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };

        let mut delivered = 0;
        for conn in recipients {
            match conn.deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    let reason = e.metric_label();
                    metrics::record_delivery_failure(reason);
                    log_delivery_failure(room, &conn, event, &e);
                }
            }
        }
        delivered
    }
}

fn remove_member(
    members: &mut HashMap<String, HashMap<ConnectionId, Weak<Connection>>>,
    room: &str,
    conn: ConnectionId,
) {
    let Some(room_members) = members.get_mut(room) else {
        return;
    };
    room_members.remove(&conn);
    room_members.retain(|_, weak| weak.strong_count() > 0);
    if room_members.is_empty() {
        members.remove(room);
    }
}

fn log_delivery_failure(room: &str, conn: &Connection, event: &ServerEvent, err: &RelayError) {
    debug!(
        target: "relay.signaling",
        session_id = %room,
        connection_id = %conn.id(),
        event = event.event_name(),
        error = %err,
        "Dropped outbound event"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let rooms = RoomRegistry::new();
        let (a, _rx) = Connection::open(8);

        assert!(rooms.join("r1", &a));
        assert!(!rooms.join("r1", &a));
        assert!(rooms.is_member("r1", a.id()));
        assert_eq!(rooms.broadcast("r1", None, &ServerEvent::SessionEnded), 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let rooms = RoomRegistry::new();
        let (a, mut a_rx) = Connection::open(8);
        let (b, mut b_rx) = Connection::open(8);
        rooms.join("r1", &a);
        rooms.join("r1", &b);

        let delivered = rooms.broadcast("r1", Some(a.id()), &ServerEvent::SessionEnded);

        assert_eq!(delivered, 1);
        assert_eq!(b_rx.try_recv().unwrap(), ServerEvent::SessionEnded);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_exclusion_reaches_all() {
        let rooms = RoomRegistry::new();
        let (a, mut a_rx) = Connection::open(8);
        let (b, mut b_rx) = Connection::open(8);
        rooms.join("r1", &a);
        rooms.join("r1", &b);

        assert_eq!(rooms.broadcast("r1", None, &ServerEvent::SessionEnded), 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let rooms = RoomRegistry::new();
        let (a, _a_rx) = Connection::open(8);
        let (b, mut b_rx) = Connection::open(8);
        rooms.join("r1", &a);
        rooms.join("r2", &b);

        assert_eq!(
            rooms.broadcast("r1", Some(a.id()), &ServerEvent::SessionEnded),
            0
        );
        assert!(b_rx.try_recv().is_err());
        assert_eq!(
            rooms.broadcast("missing", None, &ServerEvent::SessionEnded),
            0
        );
    }

    #[tokio::test]
    async fn test_membership_does_not_keep_connection_alive() {
        let rooms = RoomRegistry::new();
        let (a, _a_rx) = Connection::open(8);
        let (b, b_rx) = Connection::open(8);
        rooms.join("r1", &a);
        rooms.join("r1", &b);

        let weak = Arc::downgrade(&b);
        drop(b);
        drop(b_rx);
        assert!(weak.upgrade().is_none());

        assert_eq!(rooms.broadcast("r1", None, &ServerEvent::SessionEnded), 1);

        // The dead member is pruned once the room changes
        rooms.leave_all(a.id());
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_all_removes_every_membership() {
        let rooms = RoomRegistry::new();
        let (a, _a_rx) = Connection::open(8);
        let (b, _b_rx) = Connection::open(8);
        rooms.join("r1", &a);
        rooms.join("r2", &a);
        rooms.join("r2", &b);

        assert_eq!(
            rooms.leave_all(a.id()),
            vec!["r1".to_string(), "r2".to_string()]
        );
        assert!(!rooms.is_member("r1", a.id()));
        assert!(!rooms.is_member("r2", a.id()));
        assert!(rooms.is_member("r2", b.id()));
        // r1 became empty and was dropped
        assert_eq!(rooms.room_count(), 1);

        assert!(rooms.leave_all(a.id()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_affect_other_members() {
        let rooms = RoomRegistry::new();
        let (sender, _sender_rx) = Connection::open(8);
        let (slow, _slow_rx) = Connection::open(1);
        let (closed, closed_rx) = Connection::open(8);
        let (healthy, mut healthy_rx) = Connection::open(8);
        for conn in [&sender, &slow, &closed, &healthy] {
            rooms.join("r1", conn);
        }
        slow.deliver(ServerEvent::SessionEnded).unwrap();
        drop(closed_rx);

        let delivered = rooms.broadcast("r1", Some(sender.id()), &ServerEvent::SessionEnded);

        assert_eq!(delivered, 1);
        assert_eq!(healthy_rx.try_recv().unwrap(), ServerEvent::SessionEnded);
    }
}
