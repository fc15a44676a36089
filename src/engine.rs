use crate::chess::{Move, Side};
use crate::player::{
    ComputingState, LogKind, MessageLogger, MoveSink, MoveStats, Player, PlayerFactory,
    PlayerState, ThinkContext, null_logger,
};
use crate::tc::GoSpec;
use log::{error, trace, warn};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

/// Ticks an engine gets to exit after `quit` before it is killed.
const STOPPING_TICKS: u32 = 6;

/// Idle ticks between liveness pings while an engine sits ready.
const PING_TICKS: u32 = 20;

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct EngineConfig {
    pub name: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub dir: String,
    pub elo: i32,
    pub uci_options: Vec<(String, String)>,
}

/// UCI engine subprocess behind the `Player` interface. One reader
/// thread per engine parses its stdout and delivers best moves to the
/// attached game.
pub struct UciEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    state: AtomicU8,
    tick_state: AtomicU32,
    ponder_mode: AtomicBool,
    stopping_ticks: AtomicU32,
    proc: Mutex<ProcState>,
    sink: Mutex<Option<(Side, Arc<dyn MoveSink>)>>,
    logger: Mutex<MessageLogger>,
    stats: Mutex<MoveStats>,
}

#[derive(Default)]
struct ProcState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    computing: ComputingState,
    expecting_bestmove: bool,
    pondering_move: Option<Move>,
    think_start: Option<Instant>,
}

impl UciEngine {
    pub fn from_config(config: EngineConfig) -> UciEngine {
        UciEngine {
            inner: Arc::new(Inner {
                config,
                state: AtomicU8::new(PlayerState::Idle as u8),
                tick_state: AtomicU32::new(0),
                ponder_mode: AtomicBool::new(false),
                stopping_ticks: AtomicU32::new(0),
                proc: Mutex::new(ProcState::default()),
                sink: Mutex::new(None),
                logger: Mutex::new(null_logger()),
                stats: Mutex::new(MoveStats::default()),
            }),
        }
    }
}

impl Inner {
    fn set_state(&self, st: PlayerState) {
        let old = self.state.swap(st as u8, Ordering::SeqCst);
        if old != st as u8 {
            self.tick_state.store(0, Ordering::SeqCst);
        }
    }

    fn state(&self) -> PlayerState {
        match self.state.load(Ordering::SeqCst) {
            0 => PlayerState::Idle,
            1 => PlayerState::Starting,
            2 => PlayerState::Ready,
            3 => PlayerState::Playing,
            4 => PlayerState::Stopping,
            _ => PlayerState::Stopped,
        }
    }

    fn log(&self, line: &str, kind: LogKind) {
        let logger = self.logger.lock().unwrap().clone();
        logger(&self.config.name, line, kind);
    }

    /// Short stdin write; never waits for a reply.
    fn write_line(&self, proc: &mut ProcState, line: &str) {
        trace!("{} < {line}", self.config.name);
        let Some(stdin) = proc.stdin.as_mut() else {
            return;
        };
        if writeln!(stdin, "{line}").and_then(|_| stdin.flush()).is_err() {
            warn!("{}: engine pipe closed", self.config.name);
            self.set_state(PlayerState::Stopped);
            return;
        }
        self.log(line, LogKind::ToEngine);
    }

    fn reader_loop(self: Arc<Self>, stdout: std::process::ChildStdout) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim();
            if !line.is_empty() {
                trace!("{} > {line}", self.config.name);
                self.log(line, LogKind::FromEngine);
                self.parse_line(line);
            }
        }
        // engine exited or closed its pipe
        self.set_state(PlayerState::Stopped);
    }

    fn parse_line(&self, line: &str) {
        if line == "uciok" {
            let mut proc = self.proc.lock().unwrap();
            for (name, value) in &self.config.uci_options {
                self.write_line(&mut proc, &format!("setoption name {name} value {value}"));
            }
            self.write_line(&mut proc, "isready");
            return;
        }

        if line == "readyok" {
            if self.state() == PlayerState::Starting {
                self.set_state(PlayerState::Ready);
            }
            return;
        }

        if line.starts_with("info ") {
            let mut stats = self.stats.lock().unwrap();
            parse_info_line(line, &mut stats);
            return;
        }

        if let Some((mv_str, ponder_str)) = parse_bestmove_line(line) {
            self.deliver_bestmove(&mv_str, ponder_str.as_deref());
        }
    }

    fn deliver_bestmove(&self, mv_str: &str, ponder_str: Option<&str>) {
        let (old, consumed) = {
            let mut proc = self.proc.lock().unwrap();
            if !proc.expecting_bestmove {
                return;
            }
            proc.expecting_bestmove = false;
            let old = proc.computing;
            proc.computing = ComputingState::Idle;
            let consumed = proc.think_start.map_or(0.0, |t| t.elapsed().as_secs_f64());
            (old, consumed)
        };

        let mv = match Move::parse(mv_str) {
            Some(mv) => mv,
            None => {
                error!(
                    "{} (cmd={}) gave us invalid move: {mv_str}",
                    self.config.name, self.config.cmd
                );
                Move::default()
            }
        };
        let ponder = ponder_str.and_then(Move::parse);

        // The sink takes its own lock; hold nothing of ours while
        // calling out.
        let attached = self.sink.lock().unwrap().clone();
        if let Some((side, sink)) = attached {
            sink.move_made(side, mv, mv_str, ponder, consumed, old);
        }
    }
}

impl Player for UciEngine {
    fn name(&self) -> String {
        self.inner.config.name.clone()
    }

    fn state(&self) -> PlayerState {
        self.inner.state()
    }

    fn tick_state(&self) -> u32 {
        self.inner.tick_state.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        let ticks = self.inner.tick_state.fetch_add(1, Ordering::SeqCst) + 1;

        // liveness ping while parked between games
        if self.inner.state() == PlayerState::Ready && ticks % PING_TICKS == 0 {
            let mut proc = self.inner.proc.lock().unwrap();
            self.inner.write_line(&mut proc, "isready");
        }

        if self.inner.state() == PlayerState::Stopping {
            let left = self
                .inner
                .stopping_ticks
                .load(Ordering::SeqCst)
                .saturating_sub(1);
            self.inner.stopping_ticks.store(left, Ordering::SeqCst);

            let mut proc = self.inner.proc.lock().unwrap();
            let exited = proc
                .child
                .as_mut()
                .is_none_or(|c| matches!(c.try_wait(), Ok(Some(_))));
            if exited || left == 0 {
                if let Some(child) = proc.child.as_mut() {
                    let _ = child.kill();
                }
                proc.child = None;
                proc.stdin = None;
                drop(proc);
                self.inner.set_state(PlayerState::Stopped);
            }
        }
    }

    fn set_ponder_mode(&self, on: bool) {
        self.inner.ponder_mode.store(on, Ordering::SeqCst);
    }

    fn set_message_logger(&self, logger: MessageLogger) {
        *self.inner.logger.lock().unwrap() = logger;
    }

    fn attach(&self, side: Side, sink: Arc<dyn MoveSink>) {
        *self.inner.sink.lock().unwrap() = Some((side, sink));
    }

    fn detach(&self) {
        *self.inner.sink.lock().unwrap() = None;
    }

    fn kick_start(&self) {
        if self.inner.state() != PlayerState::Idle {
            // reused from the pool; the handshake already happened
            if self.inner.state() == PlayerState::Playing {
                self.inner.set_state(PlayerState::Ready);
            }
            return;
        }
        self.inner.set_state(PlayerState::Starting);

        let config = &self.inner.config;
        let mut command = Command::new(&config.cmd);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if !config.dir.is_empty() {
            command.current_dir(&config.dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(
                    "{} (cmd={}) failed to start: {err}",
                    config.name, config.cmd
                );
                self.inner.set_state(PlayerState::Stopped);
                return;
            }
        };

        let stdout = child.stdout.take();
        let stdin = child.stdin.take();
        {
            let mut proc = self.inner.proc.lock().unwrap();
            proc.child = Some(child);
            proc.stdin = stdin;
            self.inner.write_line(&mut proc, "uci");
        }

        if let Some(stdout) = stdout {
            let inner = self.inner.clone();
            thread::spawn(move || inner.reader_loop(stdout));
        }
    }

    fn new_game(&self) {
        let mut proc = self.inner.proc.lock().unwrap();
        proc.pondering_move = None;
        proc.expecting_bestmove = false;
        proc.computing = ComputingState::Idle;
        self.inner.write_line(&mut proc, "ucinewgame");
    }

    fn go(&self, ctx: ThinkContext) {
        let mut proc = self.inner.proc.lock().unwrap();

        if proc.computing == ComputingState::Pondering {
            // Ponderhit when the predicted reply was played; otherwise
            // cancel and let the stale bestmove trigger a fresh go.
            if proc.pondering_move.is_some() && ctx.moves.last().copied() == proc.pondering_move {
                proc.computing = ComputingState::Thinking;
                proc.think_start = Some(Instant::now());
                self.inner.write_line(&mut proc, "ponderhit");
            } else if proc.expecting_bestmove {
                self.inner.write_line(&mut proc, "stop");
            }
            return;
        }

        if proc.expecting_bestmove {
            warn!("{}: go while already computing", self.inner.config.name);
            return;
        }

        proc.pondering_move = None;
        proc.expecting_bestmove = true;
        proc.computing = ComputingState::Thinking;
        proc.think_start = Some(Instant::now());

        let position = position_string(&ctx, None);
        let go = go_string(ctx.go, false);
        self.inner.write_line(&mut proc, &position);
        self.inner.write_line(&mut proc, &go);
        self.inner.set_state(PlayerState::Playing);
    }

    fn go_ponder(&self, ctx: ThinkContext, ponder: Move) {
        if !self.inner.ponder_mode.load(Ordering::SeqCst) {
            return;
        }
        let mut proc = self.inner.proc.lock().unwrap();
        if proc.expecting_bestmove {
            return;
        }

        proc.pondering_move = Some(ponder);
        proc.expecting_bestmove = true;
        proc.computing = ComputingState::Pondering;
        proc.think_start = Some(Instant::now());

        let position = position_string(&ctx, Some(ponder));
        let go = go_string(ctx.go, true);
        self.inner.write_line(&mut proc, &position);
        self.inner.write_line(&mut proc, &go);
        self.inner.set_state(PlayerState::Playing);
    }

    fn stop_thinking(&self) {
        let mut proc = self.inner.proc.lock().unwrap();
        if proc.expecting_bestmove {
            self.inner.write_line(&mut proc, "stop");
        }
    }

    fn opposite_made_move(&self, _mv: Move, _san: &str) {
        // UCI rebuilds the position on every go; nothing to track here.
    }

    fn is_safe_to_detach(&self) -> bool {
        self.inner.state() == PlayerState::Stopped
            || !self.inner.proc.lock().unwrap().expecting_bestmove
    }

    fn prepare_to_detach(&self) {
        self.stop_thinking();
    }

    fn quit(&self) {
        if self.inner.state() >= PlayerState::Stopping {
            return;
        }
        {
            let mut proc = self.inner.proc.lock().unwrap();
            self.inner.write_line(&mut proc, "quit");
        }
        self.inner
            .stopping_ticks
            .store(STOPPING_TICKS, Ordering::SeqCst);
        self.inner.set_state(PlayerState::Stopping);
    }

    fn stats(&self) -> MoveStats {
        *self.inner.stats.lock().unwrap()
    }
}

fn position_string(ctx: &ThinkContext, ponder: Option<Move>) -> String {
    let mut s = match &ctx.start_fen {
        Some(fen) => format!("position fen {fen}"),
        None => String::from("position startpos"),
    };
    if !ctx.moves.is_empty() || ponder.is_some() {
        s.push_str(" moves");
        for mv in &ctx.moves {
            s.push_str(&format!(" {mv}"));
        }
        if let Some(mv) = ponder {
            s.push_str(&format!(" {mv}"));
        }
    }
    s
}

fn go_string(spec: GoSpec, ponder: bool) -> String {
    let mut s = String::from("go ");
    if ponder {
        s.push_str("ponder ");
    }
    match spec {
        GoSpec::Infinite => s.push_str("infinite"),
        GoSpec::Depth(depth) => s.push_str(&format!("depth {depth}")),
        GoSpec::MoveTimeMs(ms) => s.push_str(&format!("movetime {ms}")),
        GoSpec::Standard {
            wtime_ms,
            btime_ms,
            winc_ms,
            binc_ms,
            movestogo,
        } => {
            s.push_str(&format!(
                "wtime {wtime_ms} btime {btime_ms} winc {winc_ms} binc {binc_ms}"
            ));
            if let Some(mtg) = movestogo {
                s.push_str(&format!(" movestogo {mtg}"));
            }
        }
    }
    s
}

fn parse_bestmove_line(line: &str) -> Option<(String, Option<String>)> {
    let rest = line.strip_prefix("bestmove")?;
    let mut it = rest.split_whitespace();
    let mv = it.next()?.to_string();
    let ponder = match (it.next(), it.next()) {
        (Some("ponder"), Some(p)) => Some(p.to_string()),
        _ => None,
    };
    Some((mv, ponder))
}

fn parse_info_line(line: &str, stats: &mut MoveStats) {
    let mut it = line.split_whitespace().skip(1);
    while let Some(tok) = it.next() {
        match tok {
            "string" => break,
            "depth" => {
                if let Some(value) = it.next()
                    && let Ok(value) = value.parse::<u32>()
                {
                    stats.depth = value;
                }
            }
            "nodes" => {
                if let Some(value) = it.next()
                    && let Ok(value) = value.parse::<u64>()
                {
                    stats.nodes = value;
                }
            }
            "score" => match it.next() {
                Some("cp") => {
                    if let Some(value) = it.next()
                        && let Ok(value) = value.parse::<i32>()
                    {
                        stats.score = value;
                    }
                }
                Some("mate") => {
                    if let Some(value) = it.next()
                        && let Ok(value) = value.parse::<i32>()
                    {
                        stats.score = if value > 0 { 30000 } else { -30000 };
                    }
                }
                _ => continue,
            },
            _ => continue,
        }
    }
}

/// Creates `UciEngine` players for the configured engine names.
pub struct UciEngineFactory {
    configs: HashMap<String, EngineConfig>,
}

impl UciEngineFactory {
    pub fn new(configs: Vec<EngineConfig>) -> UciEngineFactory {
        UciEngineFactory {
            configs: configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }
}

impl PlayerFactory for UciEngineFactory {
    fn create(&self, name: &str) -> Option<Arc<dyn Player>> {
        let config = self.configs.get(name)?;
        Some(Arc::new(UciEngine::from_config(config.clone())))
    }
}
