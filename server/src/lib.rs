//! # Pong Game Server Library
//!
//! This library provides the authoritative server for a two-player paddle
//! game played over WebSockets. It owns the canonical game state, validates
//! player input, and streams state snapshots to both clients at a fixed rate.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the only copy of the ball and paddle physics. Clients send
//! movement commands and render whatever the server broadcasts.
//!
//! ### Player Management
//! Handles the lifecycle of player connections:
//! - WebSocket handshake and role assignment (`player1`, then `player2`)
//! - Rejection of any connection beyond the second
//! - Disconnection handling and notification of the remaining player
//!
//! ### State Broadcasting
//! Every tick the new game state is encoded once and offered to every
//! connection without blocking. A connection that cannot keep up is dropped
//! instead of slowing the game down for its opponent.
//!
//! ## Architecture Design
//!
//! ### Serialized Membership
//! Joins and leaves from all connection tasks flow through one event queue
//! drained by the [`dispatcher`]. It is the only writer of registry
//! membership and the only component that starts or stops a game, so
//! membership changes never race each other.
//!
//! ### Generation-Tagged Sessions
//! Each game started by the [`game`] module carries a generation number and a
//! cancellation signal. A tick loop only advances the state whose generation
//! matches its own, so a restart can never leave two loops driving one game.
//!
//! ### Short Lock Scopes
//! The registry and the game state are guarded by two independent locks. The
//! game lock covers a physics step or a paddle move; the registry lock covers
//! a membership change or a non-blocking fan-out. Socket writes happen on
//! per-connection writer tasks outside both.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connected players, their roles and outbound queues.
//!
//! ### Physics Module (`physics`)
//! Ball movement, wall bounces, goals and paddle hits as plain functions over
//! [`shared::GameState`].
//!
//! ### Game Module (`game`)
//! The session state machine (idle, active, stopped), input application and
//! the fixed-rate tick loop.
//!
//! ### Dispatcher Module (`dispatcher`)
//! The serialized control loop for joins, leaves, restarts and operator
//! broadcasts.
//!
//! ### Network Module (`network`)
//! TCP listener, WebSocket upgrade and the reader/writer task pair behind
//! every connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(server.run());
//!
//!     // Later, from anywhere:
//!     handle.broadcast("server restarting soon")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod network;
pub mod physics;
pub mod registry;

pub use config::ServerConfig;
pub use error::ServerError;
pub use network::{Server, ServerHandle};
