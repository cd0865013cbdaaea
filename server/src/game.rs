//! The authoritative game session and its fixed-rate simulation loop.
//!
//! A [`GameSession`] owns at most one live [`GameState`]. Every call to
//! [`GameSession::start`] cancels the previous state, bumps a generation
//! counter and hands the caller a [`SessionTicket`] for the new one. The tick
//! loop only ever touches the state whose generation matches its ticket, so a
//! loop left over from a restart cannot observe or mutate its successor.

use crate::physics;
use crate::registry::SharedRegistry;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Direction, GameState, Role, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session has been started yet.
    Idle,
    /// A live game state exists and its tick loop is running.
    Active,
    /// The last session was cancelled and nothing replaced it.
    Stopped,
}

/// Identifies one session generation to the loop that drives it.
#[derive(Debug)]
pub struct SessionTicket {
    generation: u64,
    cancelled: watch::Receiver<bool>,
}

impl SessionTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow() || self.cancelled.has_changed().is_err()
    }

    /// Resolves once the session is cancelled or discarded.
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.cancelled.borrow_and_update();
            if cancelled || self.cancelled.changed().await.is_err() {
                return;
            }
        }
    }
}

struct LiveGame {
    generation: u64,
    state: GameState,
    cancel: watch::Sender<bool>,
}

impl LiveGame {
    fn cancel(&self) {
        // send_replace never fails and is a no-op when already raised.
        self.cancel.send_replace(true);
    }
}

struct SessionInner {
    generation: u64,
    live: Option<LiveGame>,
    rng: StdRng,
}

pub struct GameSession {
    inner: Mutex<SessionInner>,
}

impl GameSession {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// A session whose ball spawns are reproducible.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                generation: 0,
                live: None,
                rng,
            }),
        }
    }

    /// Cancels any running session and installs a fresh game for the two
    /// given paddle owners.
    pub async fn start(&self, player1: &str, player2: &str) -> SessionTicket {
        let mut inner = self.inner.lock().await;

        if let Some(previous) = inner.live.take() {
            previous.cancel();
            info!("Session {} cancelled for restart", previous.generation);
        }

        inner.generation += 1;
        let generation = inner.generation;
        let ball = physics::spawn_ball(&mut inner.rng);
        let (cancel, cancelled) = watch::channel(false);

        inner.live = Some(LiveGame {
            generation,
            state: GameState::new(ball, player1, player2),
            cancel,
        });

        info!(
            "Session {} started: {} vs {}",
            generation, player1, player2
        );

        SessionTicket {
            generation,
            cancelled,
        }
    }

    /// Cancels the running session. Returns false if there was none.
    pub async fn stop(&self) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.live.take() {
            Some(live) => {
                live.cancel();
                info!("Session {} stopped", live.generation);
                true
            }
            None => false,
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        let inner = self.inner.lock().await;

        match (&inner.live, inner.generation) {
            (Some(_), _) => SessionPhase::Active,
            (None, 0) => SessionPhase::Idle,
            (None, _) => SessionPhase::Stopped,
        }
    }

    /// Generation of the most recently started session, 0 if none.
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    pub async fn snapshot(&self) -> Option<GameState> {
        let inner = self.inner.lock().await;
        inner.live.as_ref().map(|live| live.state.clone())
    }

    /// Advances the given generation by one tick and returns the resulting
    /// state, or `None` if that generation is no longer the live one.
    pub async fn step(&self, generation: u64) -> Option<GameState> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let live = inner
            .live
            .as_mut()
            .filter(|live| live.generation == generation && !*live.cancel.borrow())?;

        let outcome = physics::step(&mut live.state, &mut inner.rng);
        if let Some(role) = outcome.goal {
            let score = live.state.score;
            info!(
                "Goal for {} (score {}-{})",
                role, score.player1, score.player2
            );
        }

        Some(live.state.clone())
    }

    /// Moves the paddle for `role` if `connection_id` owns it. Returns
    /// whether the paddle was moved.
    pub async fn apply_movement(
        &self,
        connection_id: &str,
        role: Role,
        direction: Direction,
    ) -> bool {
        let mut inner = self.inner.lock().await;

        let Some(live) = inner.live.as_mut() else {
            return false;
        };

        let paddle = live.state.paddle_mut(role);
        if paddle.id != connection_id {
            debug!(
                "Ignoring {} move from {}: paddle owned by {}",
                role, connection_id, paddle.id
            );
            return false;
        }

        paddle.shift(direction);
        true
    }

    #[cfg(test)]
    async fn edit_state(&self, edit: impl FnOnce(&mut GameState)) {
        let mut inner = self.inner.lock().await;
        if let Some(live) = inner.live.as_mut() {
            edit(&mut live.state);
        }
    }
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one session generation at a fixed rate until it is cancelled.
///
/// The session lock is held only for the physics step; the snapshot is
/// encoded and broadcast after it is released. The ticket is checked again
/// under the registry lock, so no frame goes out once cancellation is seen.
pub async fn run_game_loop(
    session: Arc<GameSession>,
    registry: SharedRegistry,
    mut ticket: SessionTicket,
    tick_duration: Duration,
) {
    let generation = ticket.generation();
    let mut interval_timer = interval(tick_duration);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    interval_timer.tick().await;

    info!("Game loop {} running every {:?}", generation, tick_duration);

    loop {
        tokio::select! {
            biased;

            _ = ticket.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        let Some(snapshot) = session.step(generation).await else {
            break;
        };

        let frame = match ServerMessage::GameState(snapshot).to_json() {
            Ok(json) => Message::text(json),
            Err(e) => {
                error!("Failed to encode game state: {}", e);
                continue;
            }
        };

        let pruned = {
            let mut members = registry.write().await;
            // A restart may have cancelled this generation since the step.
            if ticket.is_cancelled() {
                break;
            }
            members.broadcast(&frame)
        };

        for id in pruned {
            warn!("Pruned {} after failed state update", id);
        }
    }

    info!("Game loop {} exited", generation);
}
