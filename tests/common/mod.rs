//! Scripted players for exercising the tournament without real engine
//! processes. A player's "brain" looks up the move for the current ply
//! and can fake think time and delivery delay.

use gauntlet::chess::{Move, Side};
use gauntlet::player::{
    ComputingState, MoveSink, MoveStats, Player, PlayerFactory, PlayerState, ThinkContext,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub struct Reply {
    pub mv: String,
    /// Think time the player reports, in seconds (not real time).
    pub consumed: f64,
    /// Scheduler ticks before the move is delivered.
    pub delay: u32,
}

pub type Brain = Arc<dyn Fn(&ThinkContext) -> Option<Reply> + Send + Sync>;

/// Answers with `moves[ply]`; no answer once the line runs out.
pub fn line_brain(moves: &'static [&'static str], consumed: f64, delay: u32) -> Brain {
    Arc::new(move |ctx| {
        moves.get(ctx.ply).map(|mv| Reply {
            mv: mv.to_string(),
            consumed,
            delay,
        })
    })
}

/// Scholar's mate: White always wins in seven plies.
pub const WHITE_WINS_LINE: &[&str] = &[
    "e2e4", "e7e5", "f1c4", "b8c6", "d1h5", "g8f6", "h5f7",
];

/// Four quiet plies; pair with max-game-length adjudication.
pub const QUIET_LINE: &[&str] = &["e2e4", "e7e5", "g1f3", "b8c6"];

pub struct ScriptedPlayer {
    name: String,
    brain: Brain,
    state: Mutex<PlayerState>,
    ticks: AtomicU32,
    sink: Mutex<Option<(Side, Arc<dyn MoveSink>)>>,
    pending: Mutex<Option<(Reply, u32)>>,
}

impl ScriptedPlayer {
    pub fn new(name: &str, brain: Brain) -> ScriptedPlayer {
        ScriptedPlayer {
            name: name.to_string(),
            brain,
            state: Mutex::new(PlayerState::Idle),
            ticks: AtomicU32::new(0),
            sink: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }
}

impl Player for ScriptedPlayer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> PlayerState {
        *self.state.lock().unwrap()
    }

    fn tick_state(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);

        let due = {
            let mut pending = self.pending.lock().unwrap();
            match pending.take() {
                Some((reply, 0)) => Some(reply),
                Some((reply, ticks_left)) => {
                    *pending = Some((reply, ticks_left - 1));
                    None
                }
                None => None,
            }
        };

        if let Some(reply) = due {
            let attached = self.sink.lock().unwrap().clone();
            if let Some((side, sink)) = attached {
                sink.move_made(
                    side,
                    Move::parse(&reply.mv).unwrap_or_default(),
                    &reply.mv,
                    None,
                    reply.consumed,
                    ComputingState::Thinking,
                );
            }
        }
    }

    fn set_ponder_mode(&self, _on: bool) {}

    fn attach(&self, side: Side, sink: Arc<dyn MoveSink>) {
        *self.sink.lock().unwrap() = Some((side, sink));
    }

    fn detach(&self) {
        *self.sink.lock().unwrap() = None;
    }

    fn kick_start(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != PlayerState::Stopped {
            *state = PlayerState::Ready;
        }
    }

    fn new_game(&self) {
        *self.pending.lock().unwrap() = None;
    }

    fn go(&self, ctx: ThinkContext) {
        let reply = (self.brain)(&ctx);
        *self.pending.lock().unwrap() = reply.map(|r| {
            let delay = r.delay;
            (r, delay)
        });
        *self.state.lock().unwrap() = PlayerState::Playing;
    }

    fn go_ponder(&self, _ctx: ThinkContext, _ponder: Move) {}

    fn stop_thinking(&self) {}

    fn opposite_made_move(&self, _mv: Move, _san: &str) {}

    fn is_safe_to_detach(&self) -> bool {
        true
    }

    fn prepare_to_detach(&self) {}

    fn quit(&self) {
        *self.state.lock().unwrap() = PlayerState::Stopped;
    }

    fn stats(&self) -> MoveStats {
        MoveStats::default()
    }
}

pub struct ScriptedFactory {
    brains: HashMap<String, Brain>,
}

impl ScriptedFactory {
    pub fn new(brains: Vec<(&str, Brain)>) -> ScriptedFactory {
        ScriptedFactory {
            brains: brains
                .into_iter()
                .map(|(name, brain)| (name.to_string(), brain))
                .collect(),
        }
    }
}

impl PlayerFactory for ScriptedFactory {
    fn create(&self, name: &str) -> Option<Arc<dyn Player>> {
        let brain = self.brains.get(name)?.clone();
        Some(Arc::new(ScriptedPlayer::new(name, brain)))
    }
}
