use crate::board::BoardFactory;
use crate::book::OpeningBook;
use crate::game::{GameConfig, GameDriver, GameState};
use crate::player::{LogKind, MessageLogger, PlayerFactory, PlayerPool};
use crate::tc::{GameClock, TimeControl};
use anyhow::Result;
use chrono::Local;
use crossbeam_channel::tick;
use log::{error, info};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub mod pairing;
pub mod schedule;
pub mod standings;

pub use schedule::{MatchRecord, MatchState};

use pairing::PairingCtx;

/// Scheduler heartbeat. Every state machine in the tournament advances
/// at this rate on one thread.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TourType {
    RoundRobin,
    Knockout,
}

impl TourType {
    pub fn as_str(self) -> &'static str {
        match self {
            TourType::RoundRobin => "roundrobin",
            TourType::Knockout => "knockout",
        }
    }

    pub fn from_str(s: &str) -> Option<TourType> {
        match s {
            "roundrobin" => Some(TourType::RoundRobin),
            "knockout" => Some(TourType::Knockout),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TourState {
    Idle,
    Playing,
    Done,
}

/// One append-only text output (PGN, result log, engine log), each
/// with its own mutex so concurrent games do not interleave lines.
struct TextSink {
    enabled: bool,
    path: PathBuf,
    lock: Mutex<()>,
}

impl TextSink {
    fn new(enabled: bool, path: PathBuf) -> TextSink {
        TextSink {
            enabled: enabled && !path.as_os_str().is_empty(),
            path,
            lock: Mutex::new(()),
        }
    }

    fn append(&self, text: &str) {
        if !self.enabled {
            return;
        }
        let _guard = self.lock.lock().unwrap();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);
        match file {
            Ok(mut file) => {
                let _ = writeln!(file, "{text}");
            }
            Err(err) => error!("cannot append to {}: {err}", self.path.display()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            enabled: false,
            path: PathBuf::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TourConfig {
    pub tour_type: TourType,
    pub event: String,
    pub site: String,
    pub time_control: TimeControl,
    pub games_per_pair: u32,
    pub concurrency: usize,
    pub shuffle_players: bool,
    pub resumable: bool,
    /// Answer the resume prompt with yes; required for non-interactive
    /// runs.
    pub auto_resume: bool,
    pub game: GameConfig,
    pub pgn: SinkConfig,
    pub pgn_rich: bool,
    pub result_log: SinkConfig,
    pub engine_log: SinkConfig,
    pub engine_log_show_time: bool,
    pub schedule_path: PathBuf,
}

impl Default for TourConfig {
    fn default() -> Self {
        TourConfig {
            tour_type: TourType::RoundRobin,
            event: "Chess Tournament".to_string(),
            site: String::new(),
            time_control: TimeControl::Standard {
                moves: 40,
                base: 60.0,
                increment: 0.6,
                margin: crate::tc::DEFAULT_MARGIN,
            },
            games_per_pair: 1,
            concurrency: 1,
            shuffle_players: false,
            resumable: true,
            auto_resume: false,
            game: GameConfig::default(),
            pgn: SinkConfig::default(),
            pgn_rich: false,
            result_log: SinkConfig::default(),
            engine_log: SinkConfig::default(),
            engine_log_show_time: false,
            schedule_path: PathBuf::from("playing.json"),
        }
    }
}

/// The tournament manager: generates the schedule, promotes records to
/// live game drivers under the concurrency cap, aggregates results and
/// persists progress so a killed process can resume.
pub struct TourManager {
    config: TourConfig,
    participants: Vec<(String, i32)>,
    records: Vec<MatchRecord>,
    games: Vec<GameDriver>,
    state: TourState,
    pool: PlayerPool,
    board_factory: Box<dyn BoardFactory>,
    book: Box<dyn OpeningBook>,
    rng: ChaCha8Rng,
    lucky: HashSet<String>,
    elo_map: HashMap<String, i32>,
    pgn_sink: TextSink,
    result_sink: TextSink,
    engine_sink: Arc<TextSink>,
    start_time: Instant,
    previous_elapsed: u64,
}

impl TourManager {
    pub fn new(
        config: TourConfig,
        participants: Vec<(String, i32)>,
        player_factory: Box<dyn PlayerFactory>,
        board_factory: Box<dyn BoardFactory>,
        book: Box<dyn OpeningBook>,
        rng: ChaCha8Rng,
    ) -> TourManager {
        let pgn_sink = TextSink::new(config.pgn.enabled, config.pgn.path.clone());
        let result_sink = TextSink::new(config.result_log.enabled, config.result_log.path.clone());
        let engine_sink = Arc::new(TextSink::new(
            config.engine_log.enabled,
            config.engine_log.path.clone(),
        ));
        let elo_map = participants.iter().cloned().collect();

        TourManager {
            config,
            participants,
            records: Vec::new(),
            games: Vec::new(),
            state: TourState::Idle,
            pool: PlayerPool::new(player_factory),
            board_factory,
            book,
            rng,
            lucky: HashSet::new(),
            elo_map,
            pgn_sink,
            result_sink,
            engine_sink,
            start_time: Instant::now(),
            previous_elapsed: 0,
        }
    }

    pub fn state(&self) -> TourState {
        self.state
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn live_games(&self) -> usize {
        self.games.len()
    }

    /// Resumes a previous schedule or creates a fresh one, then opens
    /// play; `tick` does the rest.
    pub fn prepare(&mut self) -> Result<()> {
        if !self.try_resume() {
            self.create_match_list()?;
            self.persist();
        }
        self.start();
        Ok(())
    }

    /// Runs the tournament to completion on the calling thread at the
    /// scheduler heartbeat.
    pub fn run(&mut self) -> Result<()> {
        self.prepare()?;
        let ticker = tick(TICK_INTERVAL);
        while self.state != TourState::Done {
            let _ = ticker.recv();
            self.tick();
        }
        Ok(())
    }

    fn create_match_list(&mut self) -> Result<()> {
        anyhow::ensure!(
            self.participants.len() >= 2,
            "not enough players ({})",
            self.participants.len()
        );

        self.records.clear();
        let names: Vec<String> = self.participants.iter().map(|(n, _)| n.clone()).collect();
        let mut ctx = PairingCtx {
            rng: &mut self.rng,
            book: self.book.as_mut(),
            games_per_pair: self.config.games_per_pair,
        };

        match self.config.tour_type {
            TourType::RoundRobin => pairing::create_round_robin(
                &mut self.records,
                &mut ctx,
                &names,
                self.config.shuffle_players,
            ),
            TourType::Knockout => {
                let seeds = self
                    .participants
                    .iter()
                    .map(|(name, elo)| {
                        let mut p = standings::TourPlayer::named(name);
                        p.elo = *elo;
                        p
                    })
                    .collect();
                pairing::create_knockout_round(
                    &mut self.records,
                    &mut ctx,
                    seeds,
                    0,
                    &mut self.lucky,
                );
            }
        }
        Ok(())
    }

    /// Adopts a saved schedule when the user (or auto-resume) says yes.
    /// In-flight records come back schedulable from the loader, so
    /// nothing is ever stuck in `playing` after a restart.
    fn try_resume(&mut self) -> bool {
        if !self.config.resumable {
            return false;
        }
        let Some(loaded) = schedule::load(&self.config.schedule_path) else {
            return false;
        };

        let total = loaded.records.len();
        let open = schedule::uncompleted(&loaded.records);
        if open == 0 || total == 0 {
            schedule::remove(&self.config.schedule_path);
            return false;
        }

        if !self.config.auto_resume && !schedule::ask_resume(open, total) {
            schedule::remove(&self.config.schedule_path);
            return false;
        }

        self.config.tour_type = loaded.tour_type;
        self.config.time_control = loaded.time_control;
        self.previous_elapsed = loaded.elapsed;
        self.records = loaded.records;

        self.lucky = self
            .records
            .iter()
            .filter(|r| r.is_bye())
            .map(|r| r.players[0].clone())
            .collect();

        info!(
            "resuming tournament: {} of {} matches still open",
            open, total
        );
        true
    }

    fn start(&mut self) {
        let info = format!(
            "type: {}, timer: {}, players: {}, matches: {}, concurrency: {}, ponder: {}",
            self.config.tour_type.as_str(),
            self.config.time_control,
            self.participants.len(),
            self.records.len(),
            self.config.concurrency,
            if self.config.game.ponder { "on" } else { "off" },
        );
        self.match_log(&info);

        for (name, sink) in [
            ("pgn", &self.config.pgn),
            ("result log", &self.config.result_log),
            ("engine log", &self.config.engine_log),
        ] {
            println!(
                " path of {}: {}, {}",
                name,
                if sink.path.as_os_str().is_empty() {
                    "<empty>".to_string()
                } else {
                    sink.path.display().to_string()
                },
                if sink.enabled { "on" } else { "off" },
            );
        }

        self.state = TourState::Playing;
        self.start_time = Instant::now();
    }

    /// One scheduler heartbeat: reap players, advance every live game,
    /// consume finished ones, then top the set back up.
    pub fn tick(&mut self) {
        self.pool.tick();

        let drivers: Vec<GameDriver> = self.games.clone();
        for game in &drivers {
            if !matches!(game.state(), GameState::Stopped | GameState::Ended) {
                game.tick();
            }
        }

        for game in &drivers {
            if game.state() == GameState::Stopped {
                self.match_completed(game);
                game.begin_ending();
            }
        }

        let mut reaped = Vec::new();
        self.games.retain(|game| {
            if game.state() == GameState::Ended {
                reaped.push(game.clone());
                false
            } else {
                true
            }
        });
        for game in reaped {
            for player in game.detach_players() {
                self.pool.give_back(player);
            }
        }

        if self.state == TourState::Playing {
            self.play_matches();
        }
    }

    fn play_matches(&mut self) {
        while self.games.len() < self.config.concurrency {
            let Some(idx) = self
                .records
                .iter()
                .position(|r| r.state == MatchState::None)
            else {
                break;
            };
            self.create_match(idx);
        }

        let pending = self
            .records
            .iter()
            .any(|r| r.state == MatchState::None);
        if !pending && self.games.is_empty() {
            if self.config.tour_type == TourType::Knockout && self.create_next_round() {
                return;
            }
            self.finish();
        }
    }

    fn create_match(&mut self, idx: usize) {
        let record = self.records[idx].clone();
        if !record.valid() {
            error!("match record invalid: {:?}", record.players);
            self.records[idx].state = MatchState::Error;
            self.persist();
            return;
        }

        let white = self.pool.borrow(&record.players[0]);
        let black = self.pool.borrow(&record.players[1]);
        let (white, black) = match (white, black) {
            (Some(w), Some(b)) => (w, b),
            (white, black) => {
                for p in [white, black].into_iter().flatten() {
                    self.pool.give_back(p);
                }
                eprintln!(
                    "Error: missing engine configuration for match {} ({} vs {})",
                    record.game_idx + 1,
                    record.players[0],
                    record.players[1]
                );
                self.records[idx].state = MatchState::Error;
                self.persist();
                return;
            }
        };

        let driver = GameDriver::new(
            white,
            black,
            self.board_factory.create(),
            GameClock::new(self.config.time_control),
            self.config.game,
            record.game_idx,
            record.round,
            record.start_fen.clone(),
            record.start_moves.clone(),
        );
        driver.set_message_logger(self.engine_logger());
        driver.kick_start();

        let started = format!("{}. {}, started", record.game_idx + 1, driver.title());
        println!("{started}");
        self.engine_log_system(&started);

        self.records[idx].state = MatchState::Playing;
        self.games.push(driver);
        self.persist();
    }

    fn match_completed(&mut self, game: &GameDriver) {
        let idx = game.idx();
        let Some(record) = self.records.get_mut(idx) else {
            return;
        };
        if record.state == MatchState::Completed {
            return;
        }

        let result = game.result();
        record.state = MatchState::Completed;
        record.result = result.kind;

        self.pgn_sink
            .append(&game.to_pgn(&self.config.event, &self.config.site, self.config.pgn_rich));

        let line = format!(
            "{}) {}, {} plies, {}",
            idx + 1,
            game.title(),
            game.plies(),
            result.describe()
        );
        self.match_log(&line);
        self.engine_log_system(&line);

        if self.config.tour_type == TourType::Knockout {
            self.check_to_extend_matches(idx);
        }
        self.persist();
    }

    /// Appends one tie-break game when a knockout pair finished dead
    /// even.
    fn check_to_extend_matches(&mut self, game_idx: usize) {
        let Some(extension) = pairing::tie_extension(&self.records, game_idx) else {
            return;
        };

        self.match_log(&format!(
            "Tied! Add one more game for {} vs {}",
            extension.players[0], extension.players[1]
        ));
        let mut ctx = PairingCtx {
            rng: &mut self.rng,
            book: self.book.as_mut(),
            games_per_pair: self.config.games_per_pair,
        };
        pairing::add_record(&mut self.records, &mut ctx, extension);
    }

    fn create_next_round(&mut self) -> bool {
        let winners = pairing::knockout_winners(&self.records, &self.elo_map);
        if winners.len() <= 1 {
            if let Some(champion) = winners.first() {
                self.match_log(&format!("{} wins the tournament!", champion.name));
            }
            return false;
        }

        let round = pairing::last_round(&self.records) + 1;
        let mut ctx = PairingCtx {
            rng: &mut self.rng,
            book: self.book.as_mut(),
            games_per_pair: self.config.games_per_pair,
        };
        pairing::create_knockout_round(&mut self.records, &mut ctx, winners, round, &mut self.lucky);
        self.persist();
        true
    }

    fn finish(&mut self) {
        self.state = TourState::Done;
        if self.records.is_empty() {
            return;
        }

        let separator = "----------------------------------";
        self.match_log(separator);
        let table = standings::format_table(&standings::standings(&self.records));
        self.match_log(&table);
        self.match_log(separator);

        let elapsed = self.previous_elapsed + self.start_time.elapsed().as_secs();
        self.match_log(&format!("Tournament finished in {elapsed}s"));

        schedule::remove(&self.config.schedule_path);
        self.pool.shutdown();
    }

    /// Progress line to the console and the result-log sink.
    fn match_log(&self, line: &str) {
        println!("{line}");
        self.result_sink.append(line);
    }

    fn engine_log_system(&self, line: &str) {
        let logger = self.engine_logger();
        logger("gauntlet", line, LogKind::System);
    }

    fn engine_logger(&self) -> MessageLogger {
        let sink = self.engine_sink.clone();
        let show_time = self.config.engine_log_show_time;
        Arc::new(move |name, line, kind| {
            if !sink.enabled {
                return;
            }
            let stamp = if show_time {
                Local::now().format("%H:%M:%S ").to_string()
            } else {
                String::new()
            };
            let arrow = match kind {
                LogKind::ToEngine => "< ",
                LogKind::FromEngine | LogKind::System => "> ",
            };
            sink.append(&format!("{stamp}{name}{arrow}{line}"));
        })
    }

    /// Full-list rewrite after every record transition.
    fn persist(&self) {
        if !self.config.resumable {
            return;
        }
        let elapsed = self.previous_elapsed + self.start_time.elapsed().as_secs();
        if let Err(err) = schedule::save(
            &self.config.schedule_path,
            self.config.tour_type,
            self.config.time_control,
            elapsed,
            &self.records,
        ) {
            error!("cannot persist schedule: {err}");
        }
    }
}

impl std::fmt::Debug for TourManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourManager")
            .field("type", &self.config.tour_type)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .field("games", &self.games.len())
            .finish()
    }
}
