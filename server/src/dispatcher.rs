//! Single serialized control loop for membership and session lifecycle
//!
//! Connection tasks never touch registry membership themselves. They post
//! [`ServerEvent`]s onto one ordered queue, and the [`Dispatcher`] applies them
//! one at a time:
//! - joins are assigned a role (or rejected) and announced
//! - the second join starts a game session
//! - leaves are announced and stop the session once a player is missing
//! - operator broadcasts and restarts are serialized with the above

use crate::game::{run_game_loop, GameSession};
use crate::registry::{Connection, ConnectionId, SharedRegistry};
use log::{debug, error, info, warn};
use shared::{
    joined_notice, Role, ServerMessage, MAX_PLAYERS, NOTICE_PLAYER_DISCONNECTED,
    NOTICE_START_GAME, NOTICE_WAITING_FOR_OPPONENT,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

/// Events consumed by the dispatcher, in arrival order.
#[derive(Debug)]
pub enum ServerEvent {
    /// A handshake completed. The reply carries the assigned role, or `None`
    /// if the connection was rejected and closed.
    Joined {
        connection: Connection,
        reply: oneshot::Sender<Option<Role>>,
    },
    /// A previously accepted connection's read loop ended.
    Left { id: ConnectionId },
    /// Plain-text frame for every member.
    Broadcast { text: String },
    /// Replace the running game with a fresh one.
    Restart,
}

pub struct Dispatcher {
    registry: SharedRegistry,
    session: Arc<GameSession>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    tick_duration: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: SharedRegistry,
        session: Arc<GameSession>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        tick_duration: Duration,
    ) -> Self {
        Self {
            registry,
            session,
            events,
            tick_duration,
        }
    }

    /// Processes events until every sender has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }

        info!("Event dispatcher stopped");
    }

    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Joined { connection, reply } => self.handle_join(connection, reply).await,
            ServerEvent::Left { id } => self.handle_leave(&id).await,
            ServerEvent::Broadcast { text } => self.notify(&text).await,
            ServerEvent::Restart => self.handle_restart().await,
        }
    }

    async fn handle_join(&mut self, connection: Connection, reply: oneshot::Sender<Option<Role>>) {
        let id = connection.id.clone();

        let (role, members) = {
            let mut registry = self.registry.write().await;
            let role = registry.join(connection);
            (role, registry.len())
        };

        let Some(role) = role else {
            warn!("Rejected connection {}: server full", id);
            let _ = reply.send(None);
            return;
        };

        if reply.send(Some(role)).is_err() {
            warn!("Connection {} went away before it was accepted", id);
            self.registry.write().await.leave(&id);
            return;
        }

        self.notify(&joined_notice(role)).await;

        if members == 1 {
            self.notify(NOTICE_WAITING_FOR_OPPONENT).await;
        }

        if members == MAX_PLAYERS {
            self.start_session().await;
        }
    }

    async fn handle_leave(&mut self, id: &str) {
        let (removed, remaining) = {
            let mut registry = self.registry.write().await;
            (registry.leave(id), registry.len())
        };

        if removed.is_none() {
            debug!("Connection {} was already removed", id);
        }

        self.notify(NOTICE_PLAYER_DISCONNECTED).await;

        if remaining < MAX_PLAYERS && self.session.stop().await {
            info!("Game stopped: {} player(s) left", remaining);
        }

        if remaining == 1 {
            self.notify(NOTICE_WAITING_FOR_OPPONENT).await;
        }
    }

    async fn handle_restart(&mut self) {
        let full = self.registry.read().await.is_full();
        if !full {
            info!("Restart ignored: waiting for players");
            return;
        }

        self.start_session().await;
    }

    /// Installs a new game state, announces it, tells each member who they
    /// are and spawns the tick loop.
    ///
    /// The previous generation is cancelled before anything is queued, so
    /// none of its frames can follow the announcement.
    async fn start_session(&mut self) {
        let roster = self.registry.read().await.roster();
        let owner = |role: Role| {
            roster
                .iter()
                .find(|(_, r)| *r == role)
                .map(|(id, _)| id.clone())
        };

        let (Some(player1), Some(player2)) = (owner(Role::Player1), owner(Role::Player2)) else {
            warn!("Cannot start game without both players");
            return;
        };

        let ticket = self.session.start(&player1, &player2).await;
        self.notify(NOTICE_START_GAME).await;

        {
            let mut registry = self.registry.write().await;
            for (id, role) in &roster {
                let info = ServerMessage::PlayerInfo {
                    role: *role,
                    id: id.clone(),
                };

                match info.to_json() {
                    Ok(json) => {
                        if !registry.send_to(id, Message::text(json)) {
                            warn!("Could not deliver player info to {}", id);
                        }
                    }
                    Err(e) => error!("Failed to encode player info: {}", e),
                }
            }
        }

        tokio::spawn(run_game_loop(
            Arc::clone(&self.session),
            Arc::clone(&self.registry),
            ticket,
            self.tick_duration,
        ));
    }

    async fn notify(&self, text: &str) {
        let pruned = self.registry.write().await.broadcast(&Message::text(text));
        for id in pruned {
            warn!("Pruned {} while sending notice", id);
        }
    }
}
