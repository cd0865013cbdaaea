//! Membership and fan-out for connected players
//!
//! The registry owns every accepted connection's outbound queue and the role
//! bound to it. It handles:
//! - Capacity enforcement and role assignment on join
//! - Idempotent removal on leave
//! - Non-blocking broadcast and unicast, pruning members whose queue is
//!   closed or full
//!
//! Removing a member raises its [`Shutdown`] signal. Both of its socket tasks
//! watch that signal: the writer abandons any write stuck on a slow peer and
//! the reader stops, which reports the leave like any other disconnect.

use log::{debug, info};
use shared::{Role, MAX_PLAYERS};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::tungstenite::Message;

/// Opaque per-connection identifier, derived from the peer address.
pub type ConnectionId = String;

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// A connection that completed the WebSocket handshake and is waiting to
/// be assigned a role.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    pub fn new(id: impl Into<ConnectionId>, outbound: mpsc::Sender<Message>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: id.into(),
            outbound,
            shutdown,
        }
    }

    /// Signal raised once the registry lets go of this connection, whether it
    /// was rejected, removed or pruned.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown(self.shutdown.subscribe())
    }
}

/// Observes the end of a connection's registry membership.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn is_raised(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once the connection is pruned or dropped from the registry.
    pub async fn raised(&mut self) {
        loop {
            let raised = *self.0.borrow_and_update();
            if raised || self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A registered connection and the paddle it controls.
#[derive(Debug)]
struct Member {
    id: ConnectionId,
    role: Role,
    outbound: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
}

impl Member {
    /// Tells the connection's tasks to stop, even mid-write.
    fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Queues a frame without waiting. Fails when the writer has gone away
    /// or has fallen too far behind.
    fn offer(&self, message: Message) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping {} ({}): {}", self.id, self.role, e);
                false
            }
        }
    }
}

pub struct Registry {
    members: Vec<Member>,
    capacity: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PLAYERS)
    }

    /// Capacity above [`MAX_PLAYERS`] is clamped; there are only two roles.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            members: Vec::with_capacity(capacity),
            capacity: capacity.min(Role::ALL.len()),
        }
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Registers the connection under the first vacant role.
    ///
    /// Returns `None` when the registry is full or the identifier is already
    /// present. A rejected connection is dropped here, which closes it.
    pub fn join(&mut self, connection: Connection) -> Option<Role> {
        if self.is_full() || self.role_of(&connection.id).is_some() {
            return None;
        }

        let role = Role::ALL
            .into_iter()
            .find(|role| self.occupant(*role).is_none())?;

        info!("Connection {} joined as {}", connection.id, role);
        self.members.push(Member {
            id: connection.id,
            role,
            outbound: connection.outbound,
            shutdown: connection.shutdown,
        });

        Some(role)
    }

    /// Removes a member. Removing an absent identifier does nothing.
    pub fn leave(&mut self, id: &str) -> Option<Role> {
        let index = self.members.iter().position(|member| member.id == id)?;
        let member = self.members.remove(index);
        info!("Connection {} ({}) left", member.id, member.role);
        Some(member.role)
    }

    /// Offers the frame to every member and prunes those that could not take
    /// it. Returns the identifiers that were pruned.
    pub fn broadcast(&mut self, message: &Message) -> Vec<ConnectionId> {
        let mut pruned = Vec::new();

        self.members.retain(|member| {
            if member.offer(message.clone()) {
                true
            } else {
                member.close();
                pruned.push(member.id.clone());
                false
            }
        });

        pruned
    }

    /// Sends a frame to one member, pruning it on failure. Returns false if
    /// the member is absent or was pruned.
    pub fn send_to(&mut self, id: &str, message: Message) -> bool {
        let Some(index) = self.members.iter().position(|member| member.id == id) else {
            return false;
        };

        if self.members[index].offer(message) {
            true
        } else {
            self.members.remove(index).close();
            false
        }
    }

    pub fn role_of(&self, id: &str) -> Option<Role> {
        self.members
            .iter()
            .find(|member| member.id == id)
            .map(|member| member.role)
    }

    pub fn occupant(&self, role: Role) -> Option<&str> {
        self.members
            .iter()
            .find(|member| member.role == role)
            .map(|member| member.id.as_str())
    }

    /// Current members as (identifier, role) pairs, in join order.
    pub fn roster(&self) -> Vec<(ConnectionId, Role)> {
        self.members
            .iter()
            .map(|member| (member.id.clone(), member.role))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_test::{assert_pending, assert_ready, task};

    fn connection(id: &str) -> (Connection, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(id, tx), rx)
    }

    fn text(message: Option<Message>) -> String {
        match message {
            Some(Message::Text(text)) => text.as_str().to_string(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_roles_assigned_in_join_order() {
        let mut registry = Registry::new();
        let (a, _rx_a) = connection("a");
        let (b, _rx_b) = connection("b");

        assert_eq!(registry.join(a), Some(Role::Player1));
        assert_eq!(registry.join(b), Some(Role::Player2));
        assert_eq!(registry.occupant(Role::Player1), Some("a"));
        assert_eq!(registry.occupant(Role::Player2), Some("b"));
        assert!(registry.is_full());
    }

    #[test]
    fn test_third_join_rejected_and_closed() {
        let mut registry = Registry::new();
        let (a, _rx_a) = connection("a");
        let (b, _rx_b) = connection("b");
        let (c, mut rx_c) = connection("c");

        registry.join(a);
        registry.join(b);
        assert_eq!(registry.join(c), None);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.role_of("c"), None);
        // The rejected connection's queue was dropped with it.
        assert_eq!(rx_c.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut registry = Registry::new();
        let (first, _rx1) = connection("same");
        let (second, _rx2) = connection("same");

        assert_eq!(registry.join(first), Some(Role::Player1));
        assert_eq!(registry.join(second), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut registry = Registry::new();
        let (a, _rx_a) = connection("a");
        registry.join(a);

        assert_eq!(registry.leave("a"), Some(Role::Player1));
        assert_eq!(registry.leave("a"), None);
        assert_eq!(registry.leave("never-joined"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_vacated_role_is_reused() {
        let mut registry = Registry::new();
        let (a, _rx_a) = connection("a");
        let (b, _rx_b) = connection("b");
        let (c, _rx_c) = connection("c");

        registry.join(a);
        registry.join(b);
        registry.leave("a");

        assert_eq!(registry.join(c), Some(Role::Player1));
        assert_eq!(
            registry.roster(),
            vec![
                ("b".to_string(), Role::Player2),
                ("c".to_string(), Role::Player1),
            ]
        );
    }

    #[test]
    fn test_broadcast_reaches_every_member() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = connection("a");
        let (b, mut rx_b) = connection("b");
        registry.join(a);
        registry.join(b);

        let pruned = registry.broadcast(&Message::text("hello"));

        assert!(pruned.is_empty());
        assert_eq!(text(rx_a.try_recv().ok()), "hello");
        assert_eq!(text(rx_b.try_recv().ok()), "hello");
    }

    #[test]
    fn test_broadcast_prunes_closed_member_and_continues() {
        let mut registry = Registry::new();
        let (a, rx_a) = connection("a");
        let (b, mut rx_b) = connection("b");
        registry.join(a);
        registry.join(b);
        drop(rx_a);

        let pruned = registry.broadcast(&Message::text("tick"));

        assert_eq!(pruned, vec!["a".to_string()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.role_of("b"), Some(Role::Player2));
        assert_eq!(text(rx_b.try_recv().ok()), "tick");
    }

    #[test]
    fn test_broadcast_prunes_member_with_full_queue() {
        let mut registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.join(Connection::new("slow", tx));

        assert!(registry.broadcast(&Message::text("one")).is_empty());
        assert_eq!(registry.broadcast(&Message::text("two")), vec!["slow".to_string()]);
        assert!(registry.is_empty());

        assert_eq!(text(rx.try_recv().ok()), "one");
    }

    #[test]
    fn test_send_to_targets_single_member() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = connection("a");
        let (b, mut rx_b) = connection("b");
        registry.join(a);
        registry.join(b);

        assert!(registry.send_to("b", Message::text("only b")));
        assert!(!registry.send_to("zzz", Message::text("nobody")));

        assert!(rx_a.try_recv().is_err());
        assert_eq!(text(rx_b.try_recv().ok()), "only b");
    }

    #[test]
    fn test_send_to_prunes_on_failure() {
        let mut registry = Registry::new();
        let (a, rx_a) = connection("a");
        registry.join(a);
        drop(rx_a);

        assert!(!registry.send_to("a", Message::text("gone")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pruning_raises_shutdown_signal() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::channel(1);
        let slow = Connection::new("slow", tx);
        let mut shutdown = slow.shutdown_signal();
        registry.join(slow);

        let mut raised = task::spawn(shutdown.raised());
        assert_pending!(raised.poll());

        registry.broadcast(&Message::text("one"));
        assert_pending!(raised.poll());

        // Queue is full and still open: the member is stuck, not gone.
        registry.broadcast(&Message::text("two"));
        assert!(raised.is_woken());
        assert_ready!(raised.poll());
    }

    #[test]
    fn test_leave_and_rejection_raise_shutdown_signal() {
        let mut registry = Registry::new();
        let (a, _rx_a) = connection("a");
        let (b, _rx_b) = connection("b");
        let (c, _rx_c) = connection("c");
        let (a_signal, c_signal) = (a.shutdown_signal(), c.shutdown_signal());

        registry.join(a);
        registry.join(b);
        assert!(!a_signal.is_raised());

        registry.join(c);
        assert!(c_signal.is_raised());

        registry.leave("a");
        assert!(a_signal.is_raised());
    }

    #[test]
    fn test_capacity_is_clamped_to_available_roles() {
        let mut registry = Registry::with_capacity(10);
        for id in ["a", "b", "c"] {
            let (conn, _rx) = connection(id);
            registry.join(conn);
        }
        assert_eq!(registry.len(), 2);
    }
}
