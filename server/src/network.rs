//! Server network layer: WebSocket listener and per-connection tasks
//!
//! Every accepted TCP stream is upgraded on the configured path and split in
//! two. The write half is owned by a writer task fed from a bounded queue that
//! the registry holds; the read half stays with the connection task, which
//! forwards movement straight into the game session and reports its own end
//! to the dispatcher. Both halves stop as soon as the registry raises the
//! connection's shutdown signal.

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, ServerEvent};
use crate::error::ServerError;
use crate::game::{GameSession, SessionPhase};
use crate::registry::{Connection, ConnectionId, Registry, SharedRegistry, Shutdown};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientMessage, GameState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

/// How long a writer may spend on the close handshake of a finished
/// connection.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Main server owning the listener, the registry and the game session
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: SharedRegistry,
    session: Arc<GameSession>,

    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    /// Binds the listening socket. This is the only fatal failure point.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_session(config, GameSession::new()).await
    }

    pub async fn bind_with_session(
        config: ServerConfig,
        session: GameSession,
    ) -> Result<Self, ServerError> {
        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on ws://{}{}", listener.local_addr()?, config.ws_path);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            config,
            registry: Registry::shared(),
            session: Arc::new(session),
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
            registry: Arc::clone(&self.registry),
            session: Arc::clone(&self.session),
        }
    }

    /// Spawns the dispatcher and accepts connections until the task is
    /// dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            config,
            registry,
            session,
            events_tx,
            events_rx,
        } = self;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&session),
            events_rx,
            config.tick_duration(),
        );
        tokio::spawn(dispatcher.run());

        info!("Server started successfully");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let events = events_tx.clone();
                    let session = Arc::clone(&session);
                    let ws_path = config.ws_path.clone();
                    let buffer = config.outbound_buffer;

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, ws_path, buffer, events, session).await
                        {
                            warn!("Connection from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Cloneable control surface for a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
    registry: SharedRegistry,
    session: Arc<GameSession>,
}

impl ServerHandle {
    /// Queues a restart of the game with the current two players.
    pub fn restart(&self) -> Result<(), ServerError> {
        self.events
            .send(ServerEvent::Restart)
            .map_err(|_| ServerError::DispatcherClosed)
    }

    /// Queues a plain-text frame for every connected player.
    pub fn broadcast(&self, text: impl Into<String>) -> Result<(), ServerError> {
        self.events
            .send(ServerEvent::Broadcast { text: text.into() })
            .map_err(|_| ServerError::DispatcherClosed)
    }

    pub async fn player_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn session_phase(&self) -> SessionPhase {
        self.session.phase().await
    }

    pub async fn session_generation(&self) -> u64 {
        self.session.generation().await
    }

    pub async fn snapshot(&self) -> Option<GameState> {
        self.session.snapshot().await
    }
}

/// Upgrades the stream, registers it and runs its read loop to completion.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ws_path: String,
    buffer: usize,
    events: mpsc::UnboundedSender<ServerEvent>,
    session: Arc<GameSession>,
) -> Result<(), ServerError> {
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == ws_path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = accept_hdr_async(stream, check_path).await?;
    let (ws_sink, ws_receiver) = ws_stream.split();
    let id: ConnectionId = addr.to_string();

    let (outbound_tx, outbound_rx) = mpsc::channel(buffer.max(1));
    let connection = Connection::new(id.clone(), outbound_tx);
    let shutdown = connection.shutdown_signal();

    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(write_outbound(
        id.clone(),
        ws_sink,
        outbound_rx,
        connection.shutdown_signal(),
        closed_tx,
    ));

    let (reply, assigned) = oneshot::channel();
    events
        .send(ServerEvent::Joined { connection, reply })
        .map_err(|_| ServerError::DispatcherClosed)?;

    match assigned.await {
        Ok(Some(role)) => info!("{} playing as {}", id, role),
        Ok(None) => {
            info!("{} turned away: game is full", id);
            return Ok(());
        }
        Err(_) => return Err(ServerError::DispatcherClosed),
    }

    read_inbound(&id, ws_receiver, shutdown, closed_rx, &session).await;

    // Only accepted connections report a leave.
    if events.send(ServerEvent::Left { id: id.clone() }).is_err() {
        debug!("Dispatcher gone before {} left", id);
    }

    Ok(())
}

/// Reads frames until the peer closes, a frame fails to decode, the registry
/// drops the connection, or the writer side has shut the connection down.
async fn read_inbound(
    id: &str,
    mut ws_receiver: WsReceiver,
    mut shutdown: Shutdown,
    mut closed: oneshot::Receiver<()>,
    session: &GameSession,
) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = shutdown.raised() => {
                info!("Connection {} dropped by the server", id);
                break;
            }
            _ = &mut closed => {
                debug!("Writer for {} closed, ending read loop", id);
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        let decoded = match frame {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<ClientMessage>(&text),
            Some(Ok(Message::Binary(bytes))) => serde_json::from_slice::<ClientMessage>(&bytes),
            Some(Ok(Message::Close(_))) | None => {
                info!("Connection {} closed", id);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("Read error from {}: {}", id, e);
                break;
            }
        };

        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message from {}: {}", id, e);
                break;
            }
        };

        let Some(movement) = message.as_movement() else {
            if message.kind != shared::MOVEMENT {
                debug!("Ignoring {:?} message from {}", message.kind, id);
            } else {
                debug!("Ignoring invalid movement from {}: {:?}", id, message);
            }
            continue;
        };

        if movement.player_id != id {
            debug!(
                "Ignoring movement from {} claiming to be {}",
                id, movement.player_id
            );
            continue;
        }

        if shutdown.is_raised() {
            break;
        }

        session
            .apply_movement(id, movement.role, movement.direction)
            .await;
    }
}

/// Drains the outbound queue into the socket. Ends when the registry drops
/// the connection or a write fails, then closes the socket and signals the
/// reader. A write blocked on a peer that stopped reading is abandoned as soon
/// as the shutdown signal is raised.
async fn write_outbound(
    id: ConnectionId,
    mut ws_sink: WsSink,
    mut outbound: mpsc::Receiver<Message>,
    mut shutdown: Shutdown,
    closed: oneshot::Sender<()>,
) {
    loop {
        let message = tokio::select! {
            biased;

            _ = shutdown.raised() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;

            _ = shutdown.raised() => {
                debug!("Abandoning pending write to {}", id);
                break;
            }
            written = ws_sink.send(message) => written,
        };

        if let Err(e) = written {
            debug!("Write to {} failed: {}", id, e);
            break;
        }
    }

    drop(closed);

    if timeout(CLOSE_GRACE, ws_sink.close()).await.is_err() {
        debug!("Close handshake with {} timed out", id);
    }
    debug!("Writer for {} finished", id);
}
