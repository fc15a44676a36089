use crate::board::{Board, MoveStamp};
use crate::chess::{GameResult, Move, ResultKind, ResultReason, Side};
use crate::player::{ComputingState, LogKind, MessageLogger, MoveSink, Player, PlayerState};
use crate::tc::GameClock;
use chrono::Local;
use log::warn;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Ticks both engines may sit in `ready` before the driver starts the
/// game anyway. 5 ticks is 2.5 s at the scheduler rate.
pub const READY_GRACE_TICKS: u32 = 5;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum GameState {
    None,
    Begin,
    Ready,
    Playing,
    Stopped,
    Ending,
    Ended,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct AdjudicationConfig {
    pub enabled: bool,
    pub max_game_length: Option<usize>,
    pub egtb: bool,
    pub egtb_max_pieces: u32,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        AdjudicationConfig {
            enabled: true,
            max_game_length: None,
            egtb: false,
            egtb_max_pieces: 7,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct GameConfig {
    pub ponder: bool,
    pub adjudication: AdjudicationConfig,
    pub ready_grace_ticks: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            ponder: false,
            adjudication: AdjudicationConfig::default(),
            ready_grace_ticks: READY_GRACE_TICKS,
        }
    }
}

/// Everything a game mutates, behind the per-game critical mutex. The
/// scheduler tick contends with engine callback threads here.
struct GameCore {
    board: Box<dyn Board>,
    clock: GameClock,
    result: GameResult,
    start_fen: Option<String>,
    start_moves: Vec<Move>,
}

struct GameInner {
    idx: usize,
    round: u32,
    state: AtomicU8,
    state_ticks: AtomicU32,
    players: [Arc<dyn Player>; 2],
    config: GameConfig,
    core: Mutex<GameCore>,
    logger: Mutex<MessageLogger>,
}

/// Drives one game between two borrowed players from handshake to a
/// terminated, detachable state. Owned by the scheduler; its callback
/// half is shared with the players' I/O threads.
pub struct GameDriver {
    inner: Arc<GameInner>,
}

impl Clone for GameDriver {
    fn clone(&self) -> GameDriver {
        GameDriver {
            inner: self.inner.clone(),
        }
    }
}

impl GameDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        white: Arc<dyn Player>,
        black: Arc<dyn Player>,
        board: Box<dyn Board>,
        clock: GameClock,
        config: GameConfig,
        idx: usize,
        round: u32,
        start_fen: Option<String>,
        start_moves: Vec<Move>,
    ) -> GameDriver {
        let inner = Arc::new(GameInner {
            idx,
            round,
            state: AtomicU8::new(GameState::None as u8),
            state_ticks: AtomicU32::new(0),
            players: [white, black],
            config,
            core: Mutex::new(GameCore {
                board,
                clock,
                result: GameResult::default(),
                start_fen,
                start_moves,
            }),
            logger: Mutex::new(crate::player::null_logger()),
        });

        for side in [Side::White, Side::Black] {
            let player = &inner.players[side.index()];
            player.set_ponder_mode(config.ponder);
            player.attach(side, inner.clone());
        }

        GameDriver { inner }
    }

    pub fn set_message_logger(&self, logger: MessageLogger) {
        for player in &self.inner.players {
            player.set_message_logger(logger.clone());
        }
        *self.inner.logger.lock().unwrap() = logger;
    }

    pub fn kick_start(&self) {
        for player in &self.inner.players {
            player.kick_start();
        }
        self.inner.set_state(GameState::Begin);
    }

    pub fn tick(&self) {
        self.inner.tick();
    }

    pub fn state(&self) -> GameState {
        self.inner.state()
    }

    /// Scheduler moves a consumed game towards detachment.
    pub fn begin_ending(&self) {
        self.inner.set_state(GameState::Ending);
    }

    pub fn idx(&self) -> usize {
        self.inner.idx
    }

    pub fn result(&self) -> GameResult {
        self.inner.core.lock().unwrap().result
    }

    pub fn plies(&self) -> usize {
        self.inner.core.lock().unwrap().board.ply()
    }

    pub fn player(&self, side: Side) -> Arc<dyn Player> {
        self.inner.players[side.index()].clone()
    }

    /// `White vs Black` for progress lines.
    pub fn title(&self) -> String {
        format!(
            "{} vs {}",
            self.inner.players[0].name(),
            self.inner.players[1].name()
        )
    }

    /// Detaches both players and hands them back for pool return.
    pub fn detach_players(&self) -> [Arc<dyn Player>; 2] {
        for player in &self.inner.players {
            player.detach();
        }
        [self.inner.players[0].clone(), self.inner.players[1].clone()]
    }

    pub fn to_pgn(&self, event: &str, site: &str, rich: bool) -> String {
        let core = self.inner.core.lock().unwrap();
        let mut s = String::new();

        let tag = |s: &mut String, name: &str, value: &str| {
            let _ = writeln!(s, "[{name} \"{value}\"]");
        };

        if !event.is_empty() {
            tag(&mut s, "Event", event);
        }
        if !site.is_empty() {
            tag(&mut s, "Site", site);
        }
        let now = Local::now();
        tag(&mut s, "Date", &now.format("%Y.%m.%d").to_string());
        tag(&mut s, "Round", &self.inner.round.to_string());
        tag(&mut s, "White", &self.inner.players[0].name());
        tag(&mut s, "Black", &self.inner.players[1].name());
        tag(&mut s, "Result", core.result.kind.pgn_token());
        tag(&mut s, "TimeControl", &core.clock.time_control().to_string());
        tag(&mut s, "Time", &now.format("%H:%M:%S").to_string());
        tag(&mut s, "Board", &(self.inner.idx + 1).to_string());
        if core.result.reason != ResultReason::None {
            tag(&mut s, "Termination", core.result.reason.as_str());
        }
        if !core.board.from_origin_position() {
            tag(&mut s, "FEN", &core.board.starting_fen());
            tag(&mut s, "SetUp", "1");
        }
        let eco = core.board.eco_comment();
        for (name, value) in ["ECO", "Opening", "Variation"].into_iter().zip(eco.iter()) {
            tag(&mut s, name, value);
        }

        s.push('\n');
        let movetext = core
            .board
            .move_list_string(if rich { 4 } else { 8 }, true, rich);
        s.push_str(&movetext);
        if core.result.kind != ResultKind::None {
            if !movetext.is_empty() {
                s.push(' ');
            }
            s.push_str(core.result.kind.pgn_token());
        }
        s.push('\n');
        s
    }
}

impl GameInner {
    fn state(&self) -> GameState {
        match self.state.load(Ordering::SeqCst) {
            0 => GameState::None,
            1 => GameState::Begin,
            2 => GameState::Ready,
            3 => GameState::Playing,
            4 => GameState::Stopped,
            5 => GameState::Ending,
            _ => GameState::Ended,
        }
    }

    fn set_state(&self, st: GameState) {
        let old = self.state.swap(st as u8, Ordering::SeqCst);
        if old != st as u8 {
            self.state_ticks.store(0, Ordering::SeqCst);
        }
    }

    fn log_system(&self, line: &str) {
        let logger = self.logger.lock().unwrap().clone();
        logger("gauntlet", line, LogKind::System);
    }

    fn tick(&self) {
        self.state_ticks.fetch_add(1, Ordering::SeqCst);

        match self.state() {
            GameState::Begin | GameState::Ready => self.tick_handshake(),

            GameState::Playing => {
                // Never block the scheduler on a game whose callback is
                // busy; skip the poll for this tick instead.
                if let Ok(mut core) = self.core.try_lock() {
                    if self.state() == GameState::Playing {
                        if !self.check_time_over(&mut core) {
                            self.check_crashed_players(&mut core);
                        }
                    }
                }
            }

            GameState::Ending => {
                let mut waiting = 0;
                for player in &self.players {
                    if !player.is_safe_to_detach() {
                        waiting += 1;
                        player.prepare_to_detach();
                    }
                }
                if waiting == 0 {
                    self.set_state(GameState::Ended);
                }
            }

            _ => {}
        }
    }

    /// Both engines must check in before the game can start; a stopped
    /// engine here is a startup crash.
    fn tick_handshake(&self) {
        let state = self.state();
        let mut ok_cnt = 0;
        let mut stopped_cnt = 0;

        for player in &self.players {
            let st = player.state();
            let ok = match state {
                GameState::Begin => st == PlayerState::Ready,
                _ => {
                    st == PlayerState::Playing
                        || (st == PlayerState::Ready
                            && player.tick_state() > self.config.ready_grace_ticks)
                }
            };
            if ok {
                ok_cnt += 1;
            } else if st == PlayerState::Stopped {
                stopped_cnt += 1;
            }
        }

        if ok_cnt + stopped_cnt < 2 {
            return;
        }

        if ok_cnt == 2 {
            let mut core = self.core.lock().unwrap();
            if state == GameState::Begin {
                self.set_state(GameState::Ready);
                self.new_game(&mut core);
            } else {
                self.set_state(GameState::Playing);
                self.start_thinking(&mut core, None);
            }
            return;
        }

        let kind = if stopped_cnt == 2 {
            ResultKind::Draw
        } else if self.players[0].state() == PlayerState::Stopped {
            ResultKind::Loss
        } else {
            ResultKind::Win
        };
        let mut core = self.core.lock().unwrap();
        self.game_over(&mut core, GameResult::new(kind, ResultReason::Crash));
    }

    fn new_game(&self, core: &mut GameCore) {
        let start_fen = core.start_fen.clone();
        core.board.new_game(start_fen.as_deref());
        let stm = core.board.side_to_move();
        core.clock.begin_move(stm, 0);

        if !core.start_moves.is_empty() {
            let moves = core.start_moves.clone();
            for mv in moves {
                if !core.board.check_make(mv) {
                    break;
                }
            }
            core.board.set_last_comment("End of opening");
        }

        for player in &self.players {
            player.new_game();
        }
    }

    fn think_context(core: &GameCore) -> crate::player::ThinkContext {
        let ply = core.board.ply();
        crate::player::ThinkContext {
            start_fen: if core.board.from_origin_position() {
                None
            } else {
                Some(core.board.starting_fen())
            },
            moves: core.board.moves(),
            ply,
            go: core.clock.go_spec(ply),
        }
    }

    fn start_thinking(&self, core: &mut GameCore, ponder: Option<Move>) {
        let side = core.board.side_to_move();
        let ply = core.board.ply();
        core.clock.begin_move(side, ply);

        let ctx = Self::think_context(core);
        if let Some(pm) = ponder
            && core.board.is_legal(pm)
        {
            self.players[side.opposite().index()].go_ponder(ctx.clone(), pm);
        }
        self.players[side.index()].go(ctx);
    }

    fn check_time_over(&self, core: &mut GameCore) -> bool {
        let side = core.board.side_to_move();
        if !core.clock.is_time_over(side) {
            return false;
        }

        let mut diag = String::from("Timeleft for ");
        for sd in [Side::Black, Side::White] {
            let _ = write!(
                diag,
                "{}: {:.2}",
                self.players[sd.index()].name(),
                core.clock.time_left(sd)
            );
            if sd == side {
                let _ = write!(diag, ", used: {:.2}", core.clock.last_query_consumed);
            }
            if sd == Side::Black {
                diag.push_str(", ");
            }
        }
        self.log_system(&diag);

        self.game_over(
            core,
            GameResult::win_for(side.opposite(), ResultReason::Timeout),
        );
        true
    }

    /// A player gone to `stopped` mid-game died outside the terminal
    /// flow; score it as a crash loss.
    fn check_crashed_players(&self, core: &mut GameCore) {
        let white_dead = self.players[0].state() == PlayerState::Stopped;
        let black_dead = self.players[1].state() == PlayerState::Stopped;
        if !white_dead && !black_dead {
            return;
        }
        let kind = match (white_dead, black_dead) {
            (true, true) => ResultKind::Draw,
            (true, false) => ResultKind::Loss,
            _ => ResultKind::Win,
        };
        self.game_over(core, GameResult::new(kind, ResultReason::Crash));
    }

    fn game_over(&self, core: &mut GameCore, result: GameResult) {
        for player in &self.players {
            player.stop_thinking();
        }
        core.result = result;
        self.set_state(GameState::Stopped);
    }

    fn make(&self, core: &mut GameCore, mv: Move, mv_str: &str, side: Side) -> bool {
        if !core.board.check_make(mv) {
            let name = self.players[side.index()].name();
            self.log_system(&format!("Illegal move {mv_str} from {name}"));
            self.game_over(
                core,
                GameResult::win_for(side.opposite(), ResultReason::IllegalMove),
            );
            return false;
        }

        let result = core.board.rule();
        if result.is_terminal() {
            self.game_over(core, result);
            return false;
        }

        let adjudication = &self.config.adjudication;
        if adjudication.enabled {
            if let Some(max) = adjudication.max_game_length
                && core.board.ply() >= max
            {
                self.game_over(
                    core,
                    GameResult::new(ResultKind::Draw, ResultReason::Adjudication),
                );
                return false;
            }

            if adjudication.egtb && core.board.piece_count() <= adjudication.egtb_max_pieces {
                let (result, probe_err) = core.board.probe_syzygy(adjudication.egtb_max_pieces);
                if result.is_terminal() {
                    self.game_over(core, result);
                    return false;
                }
                if probe_err && core.board.last_was_capture() {
                    self.log_system(
                        "Error: unable to probe tablebase, position invalid, illegal or not in tablebase",
                    );
                }
            }
        }

        let san = core.board.last_san();
        self.players[side.opposite().index()].opposite_made_move(mv, &san);
        true
    }
}

impl MoveSink for GameInner {
    fn move_made(
        &self,
        side: Side,
        mv: Move,
        mv_str: &str,
        ponder: Option<Move>,
        consumed: f64,
        prev: ComputingState,
    ) {
        if self.state() != GameState::Playing {
            return;
        }

        let mut core = self.core.lock().unwrap();
        if self.state() != GameState::Playing || core.board.side_to_move() != side {
            return;
        }
        if self.check_time_over(&mut core) {
            self.log_system(&format!("TimeOver for {mv_str}"));
            return;
        }

        match prev {
            ComputingState::Thinking => {
                if !self.make(&mut core, mv, mv_str, side) {
                    return;
                }

                let stats = self.players[side.index()].stats();
                core.board.stamp_last(MoveStamp {
                    elapsed: consumed,
                    score: stats.score,
                    depth: stats.depth,
                    nodes: stats.nodes,
                });
                let ply = core.board.ply();
                core.clock.end_move(side, consumed, ply);

                let ponder = if self.config.ponder { ponder } else { None };
                self.start_thinking(&mut core, ponder);
            }
            ComputingState::Pondering => {
                // Missed ponderhit: the cancelled ponder search came
                // back, re-issue a real go.
                let ctx = Self::think_context(&core);
                self.players[side.index()].go(ctx);
            }
            ComputingState::Idle => {
                warn!("dropping unexpected move {mv_str} in game {}", self.idx);
            }
        }
    }

    fn resigned(&self, side: Side) {
        let mut core = self.core.lock().unwrap();
        if self.state() != GameState::Playing {
            return;
        }
        self.game_over(
            &mut core,
            GameResult::win_for(side.opposite(), ResultReason::Resign),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ChessRules;
    use crate::chess::Move;
    use crate::player::{MoveStats, ThinkContext};
    use crate::tc::{GameClock, TimeControl};
    use std::sync::atomic::AtomicBool;

    /// Player whose state the test controls; records go/ponder calls.
    struct PuppetPlayer {
        name: String,
        state: Mutex<PlayerState>,
        ticks: AtomicU32,
        sink: Mutex<Option<(Side, Arc<dyn MoveSink>)>>,
        go_calls: AtomicU32,
        ponder_calls: AtomicU32,
        stopped_thinking: AtomicBool,
    }

    impl PuppetPlayer {
        fn new(name: &str) -> Arc<PuppetPlayer> {
            Arc::new(PuppetPlayer {
                name: name.to_string(),
                state: Mutex::new(PlayerState::Idle),
                ticks: AtomicU32::new(0),
                sink: Mutex::new(None),
                go_calls: AtomicU32::new(0),
                ponder_calls: AtomicU32::new(0),
                stopped_thinking: AtomicBool::new(false),
            })
        }

        fn set_state(&self, st: PlayerState) {
            *self.state.lock().unwrap() = st;
        }

        fn deliver(&self, mv: &str, ponder: Option<&str>, consumed: f64, prev: ComputingState) {
            let (side, sink) = self.sink.lock().unwrap().clone().unwrap();
            sink.move_made(
                side,
                Move::parse(mv).unwrap_or_default(),
                mv,
                ponder.and_then(Move::parse),
                consumed,
                prev,
            );
        }
    }

    impl Player for PuppetPlayer {
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
        }
        fn set_ponder_mode(&self, _on: bool) {}
        fn attach(&self, side: Side, sink: Arc<dyn MoveSink>) {
            *self.sink.lock().unwrap() = Some((side, sink));
        }
        fn detach(&self) {
            *self.sink.lock().unwrap() = None;
        }
        fn kick_start(&self) {
            self.set_state(PlayerState::Ready);
        }
        fn new_game(&self) {}
        fn go(&self, _ctx: ThinkContext) {
            self.go_calls.fetch_add(1, Ordering::SeqCst);
            self.set_state(PlayerState::Playing);
        }
        fn go_ponder(&self, _ctx: ThinkContext, _ponder: Move) {
            self.ponder_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn stop_thinking(&self) {
            self.stopped_thinking.store(true, Ordering::SeqCst);
        }
        fn opposite_made_move(&self, _mv: Move, _san: &str) {}
        fn is_safe_to_detach(&self) -> bool {
            true
        }
        fn prepare_to_detach(&self) {}
        fn quit(&self) {
            self.set_state(PlayerState::Stopped);
        }
        fn stats(&self) -> MoveStats {
            MoveStats::default()
        }
    }

    fn test_clock() -> GameClock {
        GameClock::new(TimeControl::Standard {
            moves: 40,
            base: 60.0,
            increment: 0.0,
            margin: 0.2,
        })
    }

    fn driver_for(
        white: Arc<PuppetPlayer>,
        black: Arc<PuppetPlayer>,
        config: GameConfig,
    ) -> GameDriver {
        GameDriver::new(
            white,
            black,
            Box::new(ChessRules::new()),
            test_clock(),
            config,
            0,
            1,
            None,
            Vec::new(),
        )
    }

    /// Runs the driver through handshake until both players are asked
    /// to play.
    fn start_playing(driver: &GameDriver, white: &PuppetPlayer, black: &PuppetPlayer) {
        driver.kick_start();
        driver.tick();
        assert_eq!(driver.state(), GameState::Ready);
        for _ in 0..=READY_GRACE_TICKS {
            white.tick();
            black.tick();
        }
        driver.tick();
        assert_eq!(driver.state(), GameState::Playing);
    }

    #[test]
    fn handshake_reaches_playing() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());

        start_playing(&driver, &white, &black);
        assert_eq!(white.go_calls.load(Ordering::SeqCst), 1);
        assert_eq!(black.go_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn crash_during_handshake_loses() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());

        driver.kick_start();
        black.set_state(PlayerState::Stopped);
        driver.tick();

        assert_eq!(driver.state(), GameState::Stopped);
        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Win);
        assert_eq!(result.reason, ResultReason::Crash);
    }

    #[test]
    fn both_crashed_draws() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());

        driver.kick_start();
        white.set_state(PlayerState::Stopped);
        black.set_state(PlayerState::Stopped);
        driver.tick();

        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Draw);
        assert_eq!(result.reason, ResultReason::Crash);
    }

    #[test]
    fn illegal_move_loses_and_logs() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());

        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        driver.set_message_logger(Arc::new(move |_, line, _| {
            sink.lock().unwrap().push(line.to_string());
        }));

        start_playing(&driver, &white, &black);
        white.deliver("e2e4", None, 0.01, ComputingState::Thinking);
        black.deliver("a1a8", None, 0.01, ComputingState::Thinking);

        assert_eq!(driver.state(), GameState::Stopped);
        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Win);
        assert_eq!(result.reason, ResultReason::IllegalMove);
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.contains("Illegal move a1a8 from B")),
            "missing log line: {:?}",
            lines.lock().unwrap()
        );
        assert!(white.stopped_thinking.load(Ordering::SeqCst));
        assert_eq!(driver.plies(), 1);
    }

    #[test]
    fn mate_ends_normally() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        for (player, mv) in [
            (&white, "f2f3"),
            (&black, "e7e5"),
            (&white, "g2g4"),
            (&black, "d8h4"),
        ] {
            player.deliver(mv, None, 0.01, ComputingState::Thinking);
        }

        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Loss);
        assert_eq!(result.reason, ResultReason::Mate);
    }

    #[test]
    fn wrong_side_move_is_dropped() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        black.deliver("e7e5", None, 0.01, ComputingState::Thinking);
        assert_eq!(driver.state(), GameState::Playing);
        assert_eq!(driver.plies(), 0);
    }

    #[test]
    fn overdrawn_clock_times_out_on_next_think() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", None, 0.01, ComputingState::Thinking);
        // black burns far past its budget; the flag falls once black is
        // on move again
        black.deliver("e7e5", None, 70.0, ComputingState::Thinking);
        white.deliver("g1f3", None, 0.01, ComputingState::Thinking);
        driver.tick();

        assert_eq!(driver.state(), GameState::Stopped);
        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Win);
        assert_eq!(result.reason, ResultReason::Timeout);
    }

    #[test]
    fn max_length_adjudicates_draw() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let config = GameConfig {
            adjudication: AdjudicationConfig {
                enabled: true,
                max_game_length: Some(3),
                ..AdjudicationConfig::default()
            },
            ..GameConfig::default()
        };
        let driver = driver_for(white.clone(), black.clone(), config);
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", None, 0.01, ComputingState::Thinking);
        black.deliver("e7e5", None, 0.01, ComputingState::Thinking);
        white.deliver("g1f3", None, 0.01, ComputingState::Thinking);

        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Draw);
        assert_eq!(result.reason, ResultReason::Adjudication);
    }

    #[test]
    fn ponder_flows_to_opponent_when_enabled() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let config = GameConfig {
            ponder: true,
            ..GameConfig::default()
        };
        let driver = driver_for(white.clone(), black.clone(), config);
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", Some("e7e5"), 0.01, ComputingState::Thinking);
        assert_eq!(white.ponder_calls.load(Ordering::SeqCst), 1);
        assert_eq!(black.go_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn illegal_ponder_move_is_not_forwarded() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let config = GameConfig {
            ponder: true,
            ..GameConfig::default()
        };
        let driver = driver_for(white.clone(), black.clone(), config);
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", Some("a1a8"), 0.01, ComputingState::Thinking);
        assert_eq!(white.ponder_calls.load(Ordering::SeqCst), 0);
        assert_eq!(black.go_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ponder_off_never_forwards() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", Some("e7e5"), 0.01, ComputingState::Thinking);
        assert_eq!(white.ponder_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_ponder_callback_reissues_go() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);
        let go_before = white.go_calls.load(Ordering::SeqCst);

        white.deliver("d2d4", None, 0.01, ComputingState::Pondering);
        assert_eq!(driver.plies(), 0);
        assert_eq!(white.go_calls.load(Ordering::SeqCst), go_before + 1);
    }

    #[test]
    fn resignation_ends_game() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        let (side, sink) = white.sink.lock().unwrap().clone().unwrap();
        sink.resigned(side);

        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Loss);
        assert_eq!(result.reason, ResultReason::Resign);
    }

    #[test]
    fn mid_game_crash_is_a_loss() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        black.set_state(PlayerState::Stopped);
        driver.tick();

        let result = driver.result();
        assert_eq!(result.kind, ResultKind::Win);
        assert_eq!(result.reason, ResultReason::Crash);
    }

    #[test]
    fn ending_waits_for_safe_detach() {
        let white = PuppetPlayer::new("A");
        let black = PuppetPlayer::new("B");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", None, 0.01, ComputingState::Thinking);
        black.deliver("a1a8", None, 0.01, ComputingState::Thinking);
        assert_eq!(driver.state(), GameState::Stopped);

        driver.begin_ending();
        driver.tick();
        assert_eq!(driver.state(), GameState::Ended);
    }

    #[test]
    fn pgn_has_required_tags() {
        let white = PuppetPlayer::new("Alpha");
        let black = PuppetPlayer::new("Beta");
        let driver = driver_for(white.clone(), black.clone(), GameConfig::default());
        start_playing(&driver, &white, &black);

        white.deliver("e2e4", None, 0.01, ComputingState::Thinking);
        black.deliver("a1a8", None, 0.01, ComputingState::Thinking);

        let pgn = driver.to_pgn("Test Event", "Here", false);
        for needle in [
            "[Event \"Test Event\"]",
            "[Site \"Here\"]",
            "[White \"Alpha\"]",
            "[Black \"Beta\"]",
            "[Result \"1-0\"]",
            "[Board \"1\"]",
            "[Termination \"illegal move\"]",
            "[TimeControl \"40/60\"]",
            "1. e4 1-0",
        ] {
            assert!(pgn.contains(needle), "missing {needle} in:\n{pgn}");
        }
        assert!(!pgn.contains("[FEN "));
    }
}
