//! Headless client that joins a game, logs what the server sends and can
//! steer its own paddle towards the ball.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{error, info};
use shared::{
    ClientMessage, Direction, GameState, Role, Score, ServerFrame, ServerMessage, PADDLE_SPEED,
};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080/ws")]
    server: String,

    /// Move the paddle towards the ball
    #[arg(short, long)]
    follow: bool,

    /// State updates between two paddle moves
    #[arg(long, default_value = "6")]
    move_every: u32,

    /// Disconnect after this many seconds (0 = stay until the server closes)
    #[arg(short, long, default_value = "0")]
    duration: u64,
}

/// Direction that brings the paddle's centre closer to the ball, if it is
/// more than half a step away.
fn chase(state: &GameState, role: Role) -> Option<Direction> {
    let paddle = state.paddle(role);
    let offset = state.ball.y - (paddle.y + paddle.height / 2);

    if offset > PADDLE_SPEED / 2 {
        Some(Direction::Down)
    } else if offset < -PADDLE_SPEED / 2 {
        Some(Direction::Up)
    } else {
        None
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));

    info!("Connecting to {}", args.server);
    let (ws_stream, _) = connect_async(args.server.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let mut me: Option<(Role, String)> = None;
    let mut score = Score::default();
    let mut updates: u32 = 0;

    loop {
        let next = match deadline {
            Some(deadline) => match timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!("Time is up, leaving");
                    break;
                }
            },
            None => stream.next().await,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                info!("Server closed the connection");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("Connection error: {}", e);
                break;
            }
        };

        match ServerFrame::parse(&text) {
            ServerFrame::Notice(notice) => info!("Server: {}", notice),
            ServerFrame::Message(ServerMessage::PlayerInfo { role, id }) => {
                info!("Playing as {} ({})", role, id);
                me = Some((role, id));
            }
            ServerFrame::Message(ServerMessage::GameState(state)) => {
                updates += 1;

                if state.score != score {
                    score = state.score;
                    info!("Score {} - {}", score.player1, score.player2);
                }

                let Some((role, id)) = &me else {
                    continue;
                };

                if !args.follow || updates % args.move_every.max(1) != 0 {
                    continue;
                }

                if let Some(direction) = chase(&state, *role) {
                    let movement = ClientMessage::movement(id.clone(), *role, direction);
                    sink.send(Message::text(serde_json::to_string(&movement)?)).await?;
                }
            }
        }
    }

    let _ = sink.close().await;
    info!("Received {} state updates", updates);

    Ok(())
}
