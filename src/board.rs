use crate::chess::{GameResult, Move, ResultKind, ResultReason, Side};
use shakmaty::{
    fen::Fen, san::SanPlus, uci::UciMove, CastlingMode, Chess, EnPassantMode, Position,
};
use std::collections::HashMap;
use std::fmt::Write as _;

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Engine-reported stats stamped onto a history entry.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct MoveStamp {
    pub elapsed: f64,
    pub score: i32,
    pub depth: u32,
    pub nodes: u64,
}

/// Chess rules as consumed by the game driver. One instance per game,
/// owned by its driver; nothing here is shared.
pub trait Board: Send {
    fn new_game(&mut self, start_fen: Option<&str>);

    /// Validates and makes the move. `false` leaves the position untouched.
    fn check_make(&mut self, mv: Move) -> bool;

    /// Legality probe without making the move.
    fn is_legal(&self, mv: Move) -> bool;

    /// End-of-game detection for the current position.
    fn rule(&self) -> GameResult;

    /// Endgame tablebase probe. The flag reports a probe error
    /// (missing tables, position not covered); the result is then
    /// non-terminal.
    fn probe_syzygy(&self, max_pieces: u32) -> (GameResult, bool);

    fn piece_count(&self) -> u32;
    fn side_to_move(&self) -> Side;
    fn ply(&self) -> usize;

    fn last_was_capture(&self) -> bool;
    fn last_san(&self) -> String;
    fn set_last_comment(&mut self, comment: &str);
    fn stamp_last(&mut self, stamp: MoveStamp);

    fn from_origin_position(&self) -> bool;
    fn starting_fen(&self) -> String;

    /// Move history in coordinate form, for `position ... moves ...`.
    fn moves(&self) -> Vec<Move>;

    /// SAN movetext, wrapped every `plies_per_line` plies. Rich mode
    /// includes per-move comments (stamps and annotations).
    fn move_list_string(&self, plies_per_line: usize, with_numbers: bool, rich: bool) -> String;

    /// `[ECO, Opening, Variation]` when known, fewer or none otherwise.
    fn eco_comment(&self) -> Vec<String>;
}

pub trait BoardFactory: Send + Sync {
    fn create(&self) -> Box<dyn Board>;
}

#[derive(Debug, Clone)]
struct HistEntry {
    mv: Move,
    san: String,
    capture: bool,
    comment: Option<String>,
    stamp: Option<MoveStamp>,
}

/// `Board` backed by the shakmaty rules crate.
pub struct ChessRules {
    pos: Chess,
    start_fen: Option<String>,
    hist: Vec<HistEntry>,
    repetitions: HashMap<String, u32>,
}

impl ChessRules {
    pub fn new() -> ChessRules {
        let mut board = ChessRules {
            pos: Chess::default(),
            start_fen: None,
            hist: Vec::new(),
            repetitions: HashMap::new(),
        };
        board.count_repetition();
        board
    }

    /// Position key for repetition counting: the FEN without the
    /// halfmove and fullmove counters.
    fn position_key(&self) -> String {
        let fen = Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string();
        fen.split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn count_repetition(&mut self) {
        let key = self.position_key();
        *self.repetitions.entry(key).or_insert(0) += 1;
    }

    fn to_shakmaty(&self, mv: Move) -> Option<shakmaty::Move> {
        let uci: UciMove = mv.to_string().parse().ok()?;
        uci.to_move(&self.pos).ok()
    }
}

impl Default for ChessRules {
    fn default() -> Self {
        ChessRules::new()
    }
}

impl Board for ChessRules {
    fn new_game(&mut self, start_fen: Option<&str>) {
        self.pos = match start_fen {
            Some(fen) => fen
                .parse::<Fen>()
                .ok()
                .and_then(|f| f.into_position::<Chess>(CastlingMode::Standard).ok())
                .unwrap_or_default(),
            None => Chess::default(),
        };
        self.start_fen = start_fen.map(str::to_string);
        self.hist.clear();
        self.repetitions.clear();
        self.count_repetition();
    }

    fn check_make(&mut self, mv: Move) -> bool {
        let Some(m) = self.to_shakmaty(mv) else {
            return false;
        };
        let capture = m.is_capture();
        let san = SanPlus::from_move_and_play_unchecked(&mut self.pos, &m).to_string();
        self.hist.push(HistEntry {
            mv,
            san,
            capture,
            comment: None,
            stamp: None,
        });
        self.count_repetition();
        true
    }

    fn is_legal(&self, mv: Move) -> bool {
        self.to_shakmaty(mv).is_some()
    }

    fn rule(&self) -> GameResult {
        if self.pos.is_checkmate() {
            let winner = match self.pos.turn() {
                shakmaty::Color::White => Side::Black,
                shakmaty::Color::Black => Side::White,
            };
            return GameResult::win_for(winner, ResultReason::Mate);
        }
        if self.pos.is_stalemate() {
            return GameResult::new(ResultKind::Draw, ResultReason::Stalemate);
        }
        if self.pos.is_insufficient_material() {
            return GameResult::new(ResultKind::Draw, ResultReason::InsufficientMaterial);
        }
        if self.pos.halfmoves() >= 100 {
            return GameResult::new(ResultKind::Draw, ResultReason::FiftyMove);
        }
        if self
            .repetitions
            .get(&self.position_key())
            .copied()
            .unwrap_or(0)
            >= 3
        {
            return GameResult::new(ResultKind::Draw, ResultReason::Repetition);
        }
        GameResult::default()
    }

    fn probe_syzygy(&self, _max_pieces: u32) -> (GameResult, bool) {
        // No tablebase files shipped with the runner; report a probe
        // error and let the driver decide how loudly to log it.
        (GameResult::default(), true)
    }

    fn piece_count(&self) -> u32 {
        self.pos.board().occupied().count() as u32
    }

    fn side_to_move(&self) -> Side {
        match self.pos.turn() {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }

    fn ply(&self) -> usize {
        self.hist.len()
    }

    fn last_was_capture(&self) -> bool {
        self.hist.last().is_some_and(|h| h.capture)
    }

    fn last_san(&self) -> String {
        self.hist.last().map(|h| h.san.clone()).unwrap_or_default()
    }

    fn set_last_comment(&mut self, comment: &str) {
        if let Some(last) = self.hist.last_mut() {
            last.comment = Some(comment.to_string());
        }
    }

    fn stamp_last(&mut self, stamp: MoveStamp) {
        if let Some(last) = self.hist.last_mut() {
            last.stamp = Some(stamp);
        }
    }

    fn from_origin_position(&self) -> bool {
        self.start_fen.is_none()
    }

    fn starting_fen(&self) -> String {
        self.start_fen
            .clone()
            .unwrap_or_else(|| STANDARD_START_FEN.to_string())
    }

    fn moves(&self) -> Vec<Move> {
        self.hist.iter().map(|h| h.mv).collect()
    }

    fn move_list_string(&self, plies_per_line: usize, with_numbers: bool, rich: bool) -> String {
        let mut out = String::new();
        for (i, entry) in self.hist.iter().enumerate() {
            if i > 0 {
                if plies_per_line > 0 && i % plies_per_line == 0 {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            if with_numbers && i % 2 == 0 {
                let _ = write!(out, "{}. ", i / 2 + 1);
            }
            out.push_str(&entry.san);
            if rich {
                let mut notes = Vec::new();
                if let Some(stamp) = entry.stamp {
                    notes.push(format!(
                        "{:+.2}/{} {:.2}s",
                        stamp.score as f64 / 100.0,
                        stamp.depth,
                        stamp.elapsed
                    ));
                }
                if let Some(comment) = &entry.comment {
                    notes.push(comment.clone());
                }
                if !notes.is_empty() {
                    let _ = write!(out, " {{{}}}", notes.join(", "));
                }
            }
        }
        out
    }

    fn eco_comment(&self) -> Vec<String> {
        Vec::new()
    }
}

pub struct StandardBoardFactory;

impl BoardFactory for StandardBoardFactory {
    fn create(&self) -> Box<dyn Board> {
        Box::new(ChessRules::new())
    }
}
