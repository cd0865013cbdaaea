//! Ball and paddle simulation for one tick of the authoritative game state.
//!
//! Every function here only mutates the state it is handed. Randomness is
//! injected so that a seeded generator reproduces a rally exactly.

use rand::Rng;
use shared::{Ball, GameState, Role, BALL_RADIUS, BALL_SPEED_STEP, GAME_HEIGHT, GAME_WIDTH};

/// What happened during a single call to [`step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Role credited with a goal this tick.
    pub goal: Option<Role>,
    /// Paddle that returned the ball this tick.
    pub hit: Option<Role>,
}

/// Creates a ball at the centre of the field heading in a random diagonal.
pub fn spawn_ball<R: Rng + ?Sized>(rng: &mut R) -> Ball {
    Ball::centered(random_sign(rng), random_sign(rng))
}

fn random_sign<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    if rng.gen_bool(0.5) {
        1
    } else {
        -1
    }
}

pub fn advance_ball(ball: &mut Ball) {
    ball.x += ball.dx * ball.speed;
    ball.y += ball.dy * ball.speed;
}

/// Bounces the ball off the top and bottom walls, then checks both goal
/// lines. Returns the role that scored, if any.
pub fn wall_collision<R: Rng + ?Sized>(state: &mut GameState, rng: &mut R) -> Option<Role> {
    let ball = &mut state.ball;

    if ball.y <= BALL_RADIUS {
        ball.y = BALL_RADIUS;
        ball.dy = -ball.dy;
    }

    if ball.y >= GAME_HEIGHT - BALL_RADIUS {
        ball.y = GAME_HEIGHT - BALL_RADIUS;
        ball.dy = -ball.dy;
    }

    // The ball is respawned at the centre, so a second goal cannot fire.
    let scorer = if ball.x <= BALL_RADIUS {
        Role::Player2
    } else if ball.x >= GAME_WIDTH - BALL_RADIUS {
        Role::Player1
    } else {
        return None;
    };

    state.score.award(scorer);
    state.ball = spawn_ball(rng);
    Some(scorer)
}

/// Returns the ball from whichever paddle it is travelling towards and
/// touching. The ball is snapped to the paddle face, reversed horizontally
/// and sped up.
///
/// Only the near edge is checked: a ball that has already passed the
/// paddle's face on this tick is still pulled back in front of it.
pub fn paddle_collision(state: &mut GameState) -> Option<Role> {
    let ball = &mut state.ball;

    let left = &state.paddle1;
    if ball.dx < 0
        && ball.x <= left.x + left.width + BALL_RADIUS
        && overlaps_vertically(ball, left.y, left.height)
    {
        ball.x = left.x + left.width + BALL_RADIUS;
        ball.dx = 1;
        ball.speed += BALL_SPEED_STEP;
        return Some(Role::Player1);
    }

    let right = &state.paddle2;
    if ball.dx > 0
        && ball.x >= right.x - BALL_RADIUS
        && overlaps_vertically(ball, right.y, right.height)
    {
        ball.x = right.x - BALL_RADIUS;
        ball.dx = -1;
        ball.speed += BALL_SPEED_STEP;
        return Some(Role::Player2);
    }

    None
}

fn overlaps_vertically(ball: &Ball, top: i32, height: i32) -> bool {
    ball.y + BALL_RADIUS >= top && ball.y - BALL_RADIUS <= top + height
}

/// Runs one tick: move, walls and goals, then paddles.
pub fn step<R: Rng + ?Sized>(state: &mut GameState, rng: &mut R) -> StepOutcome {
    advance_ball(&mut state.ball);
    let goal = wall_collision(state, rng);
    let hit = paddle_collision(state);
    StepOutcome { goal, hit }
}
