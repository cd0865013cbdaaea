use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever a constant or message shape below changes.
pub const PROTOCOL_VERSION: u32 = 1;

pub const GAME_WIDTH: i32 = 500;
pub const GAME_HEIGHT: i32 = 500;
pub const PADDLE_WIDTH: i32 = 25;
pub const PADDLE_HEIGHT: i32 = 100;
pub const BALL_RADIUS: i32 = 12;
/// Distance a paddle travels per movement command.
pub const PADDLE_SPEED: i32 = 50;
pub const BALL_BASE_SPEED: i32 = 1;
/// Speed gained by the ball on every paddle hit.
pub const BALL_SPEED_STEP: i32 = 1;
pub const TICK_RATE: u32 = 60;
pub const MAX_PLAYERS: usize = 2;

pub const MOVEMENT: &str = "MOVEMENT";

pub const NOTICE_WAITING_FOR_OPPONENT: &str = "waiting for opponent";
pub const NOTICE_PLAYER_DISCONNECTED: &str = "player disconnected";
pub const NOTICE_START_GAME: &str = "start game";

pub fn joined_notice(role: Role) -> String {
    format!("new player joined: {}", role)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player1,
    Player2,
}

impl Role {
    /// Roles in assignment order.
    pub const ALL: [Role; 2] = [Role::Player1, Role::Player2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Player1 => "player1",
            Role::Player2 => "player2",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "player1" => Some(Role::Player1),
            "player2" => Some(Role::Player2),
            _ => None,
        }
    }

    pub fn opponent(&self) -> Role {
        match self {
            Role::Player1 => Role::Player2,
            Role::Player2 => Role::Player1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Direction> {
        match value {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Signed paddle displacement; y grows downwards.
    pub fn delta(&self) -> i32 {
        match self {
            Direction::Up => -PADDLE_SPEED,
            Direction::Down => PADDLE_SPEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ball {
    pub x: i32,
    pub y: i32,
    pub speed: i32,
    pub dx: i32,
    pub dy: i32,
}

impl Ball {
    /// A ball at the centre of the field with base speed.
    pub fn centered(dx: i32, dy: i32) -> Self {
        Self {
            x: GAME_WIDTH / 2,
            y: GAME_HEIGHT / 2,
            speed: BALL_BASE_SPEED,
            dx,
            dy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paddle {
    pub x: i32,
    pub y: i32,
    pub role: Role,
    pub width: i32,
    pub height: i32,
    /// Connection that owns this paddle.
    pub id: String,
}

impl Paddle {
    /// Places the paddle flush against its own goal line, vertically centred.
    pub fn new(role: Role, id: impl Into<String>) -> Self {
        let x = match role {
            Role::Player1 => 0,
            Role::Player2 => GAME_WIDTH - PADDLE_WIDTH,
        };

        Self {
            x,
            y: (GAME_HEIGHT - PADDLE_HEIGHT) / 2,
            role,
            width: PADDLE_WIDTH,
            height: PADDLE_HEIGHT,
            id: id.into(),
        }
    }

    pub fn max_y(&self) -> i32 {
        GAME_HEIGHT - self.height
    }

    pub fn shift(&mut self, direction: Direction) {
        self.y = (self.y + direction.delta()).clamp(0, self.max_y());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

impl Score {
    pub fn award(&mut self, role: Role) {
        match role {
            Role::Player1 => self.player1 += 1,
            Role::Player2 => self.player2 += 1,
        }
    }

    pub fn of(&self, role: Role) -> u32 {
        match role {
            Role::Player1 => self.player1,
            Role::Player2 => self.player2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub ball: Ball,
    pub paddle1: Paddle,
    pub paddle2: Paddle,
    pub score: Score,
}

impl GameState {
    pub fn new(ball: Ball, player1_id: impl Into<String>, player2_id: impl Into<String>) -> Self {
        Self {
            ball,
            paddle1: Paddle::new(Role::Player1, player1_id),
            paddle2: Paddle::new(Role::Player2, player2_id),
            score: Score::default(),
        }
    }

    pub fn paddle(&self, role: Role) -> &Paddle {
        match role {
            Role::Player1 => &self.paddle1,
            Role::Player2 => &self.paddle2,
        }
    }

    pub fn paddle_mut(&mut self, role: Role) -> &mut Paddle {
        match role {
            Role::Player1 => &mut self.paddle1,
            Role::Player2 => &mut self.paddle2,
        }
    }
}

/// Inbound client message. Every field is optional on the wire so that
/// unknown message types still decode and can be ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub direction: String,
    pub player_id: String,
    pub player_role: String,
}

/// A movement request whose role and direction are known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementCommand {
    pub player_id: String,
    pub role: Role,
    pub direction: Direction,
}

impl ClientMessage {
    pub fn movement(player_id: impl Into<String>, role: Role, direction: Direction) -> Self {
        Self {
            kind: MOVEMENT.to_string(),
            direction: direction.as_str().to_string(),
            player_id: player_id.into(),
            player_role: role.as_str().to_string(),
        }
    }

    /// Returns the movement carried by this message, or `None` for other
    /// message types and unrecognised roles or directions.
    pub fn as_movement(&self) -> Option<MovementCommand> {
        if self.kind != MOVEMENT {
            return None;
        }

        Some(MovementCommand {
            player_id: self.player_id.clone(),
            role: Role::parse(&self.player_role)?,
            direction: Direction::parse(&self.direction)?,
        })
    }
}

/// Structured server → client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "PLAYER_INFO")]
    PlayerInfo { role: Role, id: String },
    #[serde(rename = "GAME_STATE")]
    GameState(GameState),
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Anything a client can receive: JSON messages and plain-text notices
/// arrive on the same channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Message(ServerMessage),
    Notice(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => ServerFrame::Message(message),
            Err(_) => ServerFrame::Notice(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_round_trip_through_strings() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
            assert_eq!(role.to_string(), role.as_str());
        }
        assert_eq!(Role::parse("player3"), None);
        assert_eq!(Role::parse("Player1"), None);
        assert_eq!(Role::Player1.opponent(), Role::Player2);
    }

    #[test]
    fn test_paddle_start_positions() {
        let left = Paddle::new(Role::Player1, "a");
        let right = Paddle::new(Role::Player2, "b");

        assert_eq!(left.x, 0);
        assert_eq!(right.x, GAME_WIDTH - PADDLE_WIDTH);
        assert_eq!(left.y, 200);
        assert_eq!(right.y, 200);
        assert_eq!(left.height, PADDLE_HEIGHT);
        assert_eq!(right.id, "b");
    }

    #[test]
    fn test_paddle_shift_clamps_to_field() {
        let mut paddle = Paddle::new(Role::Player1, "a");

        for _ in 0..20 {
            paddle.shift(Direction::Up);
            assert!(paddle.y >= 0 && paddle.y <= paddle.max_y());
        }
        assert_eq!(paddle.y, 0);

        for _ in 0..20 {
            paddle.shift(Direction::Down);
            assert!(paddle.y >= 0 && paddle.y <= paddle.max_y());
        }
        assert_eq!(paddle.y, GAME_HEIGHT - PADDLE_HEIGHT);
    }

    #[test]
    fn test_score_award() {
        let mut score = Score::default();
        score.award(Role::Player2);
        score.award(Role::Player2);
        score.award(Role::Player1);

        assert_eq!(score.of(Role::Player1), 1);
        assert_eq!(score.of(Role::Player2), 2);
    }

    #[test]
    fn test_client_message_movement_decoding() {
        let text = r#"{"type":"MOVEMENT","direction":"up","playerId":"127.0.0.1:5000","playerRole":"player2"}"#;
        let message: ClientMessage = serde_json::from_str(text).unwrap();

        assert_eq!(
            message.as_movement(),
            Some(MovementCommand {
                player_id: "127.0.0.1:5000".to_string(),
                role: Role::Player2,
                direction: Direction::Up,
            })
        );
    }

    #[test]
    fn test_client_message_tolerates_unknown_and_partial_messages() {
        let chat: ClientMessage = serde_json::from_str(r#"{"type":"CHAT","text":"hi"}"#).unwrap();
        assert_eq!(chat.kind, "CHAT");
        assert_eq!(chat.as_movement(), None);

        let bare: ClientMessage = serde_json::from_str(r#"{"type":"MOVEMENT"}"#).unwrap();
        assert_eq!(bare.as_movement(), None);

        let sideways: ClientMessage = serde_json::from_str(
            r#"{"type":"MOVEMENT","direction":"left","playerId":"x","playerRole":"player1"}"#,
        )
        .unwrap();
        assert_eq!(sideways.as_movement(), None);

        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_client_message_constructor_uses_wire_names() {
        let message = ClientMessage::movement("id-1", Role::Player1, Direction::Down);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "MOVEMENT",
                "direction": "down",
                "playerId": "id-1",
                "playerRole": "player1",
            })
        );
    }

    #[test]
    fn test_player_info_wire_shape() {
        let message = ServerMessage::PlayerInfo {
            role: Role::Player1,
            id: "127.0.0.1:4000".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"type": "PLAYER_INFO", "role": "player1", "id": "127.0.0.1:4000"})
        );
    }

    #[test]
    fn test_game_state_wire_shape() {
        let state = GameState::new(Ball::centered(-1, 1), "a", "b");
        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::GameState(state).to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "GAME_STATE");
        assert_eq!(value["ball"], json!({"x": 250, "y": 250, "speed": 1, "dx": -1, "dy": 1}));
        assert_eq!(
            value["paddle2"],
            json!({"x": 475, "y": 200, "role": "player2", "width": 25, "height": 100, "id": "b"})
        );
        assert_eq!(value["score"], json!({"player1": 0, "player2": 0}));
    }

    #[test]
    fn test_server_frame_classification() {
        let state = GameState::new(Ball::centered(1, 1), "a", "b");
        let json = ServerMessage::GameState(state.clone()).to_json().unwrap();

        assert_eq!(
            ServerFrame::parse(&json),
            ServerFrame::Message(ServerMessage::GameState(state))
        );
        assert_eq!(
            ServerFrame::parse(NOTICE_START_GAME),
            ServerFrame::Notice("start game".to_string())
        );
        assert_eq!(
            ServerFrame::parse(&joined_notice(Role::Player2)),
            ServerFrame::Notice("new player joined: player2".to_string())
        );
    }
}
