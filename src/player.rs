use crate::chess::{Move, Side};
use crate::tc::GoSpec;
use std::sync::{Arc, Mutex};

/// Observed lifecycle of an attached player, as the driver consumes it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum PlayerState {
    Idle,
    Starting,
    Ready,
    Playing,
    Stopping,
    Stopped,
}

/// What the engine was computing when it produced a best move. A
/// `Pondering` best move is a cancelled ponder search, not a move.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ComputingState {
    #[default]
    Idle,
    Thinking,
    Pondering,
}

#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct MoveStats {
    pub score: i32,
    pub depth: u32,
    pub nodes: u64,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LogKind {
    ToEngine,
    FromEngine,
    System,
}

/// Shared sink for engine I/O and system lines; the tournament wires
/// it to its engine-log file.
pub type MessageLogger = Arc<dyn Fn(&str, &str, LogKind) + Send + Sync>;

pub fn null_logger() -> MessageLogger {
    Arc::new(|_, _, _| {})
}

/// Snapshot handed to a player when it should start computing; the
/// player never reaches back into driver-owned state.
#[derive(Clone, Debug)]
pub struct ThinkContext {
    pub start_fen: Option<String>,
    pub moves: Vec<Move>,
    pub ply: usize,
    pub go: GoSpec,
}

/// The driver side of the player callbacks. Implementations must not
/// assume which thread calls in; engines deliver from their own I/O
/// threads.
pub trait MoveSink: Send + Sync {
    fn move_made(
        &self,
        side: Side,
        mv: Move,
        mv_str: &str,
        ponder: Option<Move>,
        consumed: f64,
        prev: ComputingState,
    );

    fn resigned(&self, side: Side);
}

/// An opaque engine player. Methods take `&self`; implementations use
/// interior mutability because calls arrive from the scheduler tick
/// thread and deliver callbacks from engine-owned threads.
pub trait Player: Send + Sync {
    fn name(&self) -> String;
    fn state(&self) -> PlayerState;
    /// Ticks spent in the current state.
    fn tick_state(&self) -> u32;
    fn tick(&self);

    fn set_ponder_mode(&self, on: bool);
    fn set_message_logger(&self, _logger: MessageLogger) {}

    fn attach(&self, side: Side, sink: Arc<dyn MoveSink>);
    fn detach(&self);

    /// Begins the protocol handshake.
    fn kick_start(&self);
    fn new_game(&self);

    fn go(&self, ctx: ThinkContext);
    fn go_ponder(&self, ctx: ThinkContext, ponder: Move);
    fn stop_thinking(&self);
    fn opposite_made_move(&self, mv: Move, san: &str);

    fn is_safe_to_detach(&self) -> bool;
    fn prepare_to_detach(&self);
    fn quit(&self);

    fn stats(&self) -> MoveStats;
}

/// Builds engine players by configured name; injected into the pool so
/// the tournament core never touches process details.
pub trait PlayerFactory: Send + Sync {
    fn create(&self, name: &str) -> Option<Arc<dyn Player>>;
}

struct PoolEntry {
    player: Arc<dyn Player>,
    leased: bool,
}

/// Owns every player for the tournament's lifetime. Drivers borrow two
/// players per game and the scheduler returns them when the game ends.
/// Crashed players are dropped here and replaced on the next borrow.
pub struct PlayerPool {
    factory: Box<dyn PlayerFactory>,
    entries: Mutex<Vec<PoolEntry>>,
}

impl PlayerPool {
    pub fn new(factory: Box<dyn PlayerFactory>) -> PlayerPool {
        PlayerPool {
            factory,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn borrow(&self, name: &str) -> Option<Arc<dyn Player>> {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            if !entry.leased
                && entry.player.name() == name
                && entry.player.state() < PlayerState::Stopping
            {
                entry.leased = true;
                return Some(entry.player.clone());
            }
        }

        let player = self.factory.create(name)?;
        entries.push(PoolEntry {
            player: player.clone(),
            leased: true,
        });
        Some(player)
    }

    pub fn give_back(&self, player: Arc<dyn Player>) {
        let mut entries = self.entries.lock().unwrap();
        let Some(idx) = entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.player, &player))
        else {
            return;
        };

        if player.state() >= PlayerState::Stopping {
            entries.remove(idx);
        } else {
            entries[idx].leased = false;
        }
    }

    /// Ticks every player and reaps dead idle ones.
    pub fn tick(&self) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter() {
            entry.player.tick();
        }
        entries.retain(|e| e.leased || e.player.state() != PlayerState::Stopped);
    }

    pub fn shutdown(&self) {
        let entries = self.entries.lock().unwrap();
        for entry in entries.iter() {
            entry.player.quit();
        }
    }

    pub fn size(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
