use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Side {
    White = 0,
    Black = 1,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

/// Board square as an index, a1 = 0 .. h8 = 63.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Square(pub u8);

impl Square {
    pub fn new(file: u8, rank: u8) -> Square {
        Square(rank * 8 + file)
    }

    pub fn file(self) -> u8 {
        self.0 % 8
    }

    pub fn rank(self) -> u8 {
        self.0 / 8
    }

    pub fn parse(s: &str) -> Option<Square> {
        let mut chars = s.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
            return None;
        }
        Some(Square::new(file as u8 - b'a', rank as u8 - b'1'))
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            (b'a' + self.file()) as char,
            (b'1' + self.rank()) as char
        )
    }
}

/// Promotion piece kinds. Discriminants match the packed-move encoding
/// used in the schedule file, so they must not be reordered.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Role {
    Queen = 2,
    Rook = 3,
    Bishop = 4,
    Knight = 5,
}

impl Role {
    pub fn from_code(code: u8) -> Option<Role> {
        match code {
            2 => Some(Role::Queen),
            3 => Some(Role::Rook),
            4 => Some(Role::Bishop),
            5 => Some(Role::Knight),
            _ => None,
        }
    }

    pub fn from_char(c: char) -> Option<Role> {
        match c.to_ascii_lowercase() {
            'q' => Some(Role::Queen),
            'r' => Some(Role::Rook),
            'b' => Some(Role::Bishop),
            'n' => Some(Role::Knight),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Role::Queen => 'q',
            Role::Rook => 'r',
            Role::Bishop => 'b',
            Role::Knight => 'n',
        }
    }
}

/// A move in pure coordinate form. The core only needs equality, the
/// coordinate string and the packed form; legality lives in the board.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl Move {
    pub fn new(from: Square, to: Square, promotion: Option<Role>) -> Move {
        Move {
            from,
            to,
            promotion,
        }
    }

    /// Parses coordinate notation, e.g. `e2e4` or `e7e8q`.
    pub fn parse(s: &str) -> Option<Move> {
        let s = s.trim();
        if !s.is_ascii() || s.len() < 4 || s.len() > 5 {
            return None;
        }
        let from = Square::parse(&s[0..2])?;
        let to = Square::parse(&s[2..4])?;
        let promotion = match s.len() {
            5 => Some(Role::from_char(s.chars().nth(4)?)?),
            _ => None,
        };
        Some(Move::new(from, to, promotion))
    }

    /// Schedule-file encoding: `to | from << 8 | promotion << 16`.
    pub fn pack(self) -> u32 {
        let promo = self.promotion.map_or(0, |r| r as u32);
        self.to.0 as u32 | (self.from.0 as u32) << 8 | promo << 16
    }

    pub fn unpack(packed: u32) -> Option<Move> {
        let to = (packed & 0xff) as u8;
        let from = (packed >> 8 & 0xff) as u8;
        if to >= 64 || from >= 64 {
            return None;
        }
        let promo = (packed >> 16 & 0xff) as u8;
        let promotion = match promo {
            0 => None,
            code => Some(Role::from_code(code)?),
        };
        Some(Move::new(Square(from), Square(to), promotion))
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(promo) = self.promotion {
            write!(f, "{}", promo.to_char())?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ResultKind {
    #[default]
    None,
    /// White won.
    Win,
    /// White lost.
    Loss,
    Draw,
}

impl ResultKind {
    pub fn pgn_token(self) -> &'static str {
        match self {
            ResultKind::None => "*",
            ResultKind::Win => "1-0",
            ResultKind::Loss => "0-1",
            ResultKind::Draw => "1/2-1/2",
        }
    }

    pub fn from_pgn_token(s: &str) -> Option<ResultKind> {
        match s {
            "*" => Some(ResultKind::None),
            "1-0" => Some(ResultKind::Win),
            "0-1" => Some(ResultKind::Loss),
            "1/2-1/2" => Some(ResultKind::Draw),
            _ => None,
        }
    }

    pub fn win_for(winner: Side) -> ResultKind {
        match winner {
            Side::White => ResultKind::Win,
            Side::Black => ResultKind::Loss,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ResultReason {
    #[default]
    None,
    Normal,
    Resign,
    Timeout,
    IllegalMove,
    Crash,
    Adjudication,
    Mate,
    Stalemate,
    Repetition,
    FiftyMove,
    InsufficientMaterial,
    Tablebase,
}

impl ResultReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultReason::None => "",
            ResultReason::Normal => "normal",
            ResultReason::Resign => "resign",
            ResultReason::Timeout => "timeout",
            ResultReason::IllegalMove => "illegal move",
            ResultReason::Crash => "crash",
            ResultReason::Adjudication => "adjudication",
            ResultReason::Mate => "mate",
            ResultReason::Stalemate => "stalemate",
            ResultReason::Repetition => "repetition",
            ResultReason::FiftyMove => "fifty moves",
            ResultReason::InsufficientMaterial => "insufficient material",
            ResultReason::Tablebase => "tablebase",
        }
    }
}

/// Terminal (or not-yet-terminal) outcome of one game. The kind is
/// canonical, the reason informational.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct GameResult {
    pub kind: ResultKind,
    pub reason: ResultReason,
}

impl GameResult {
    pub fn new(kind: ResultKind, reason: ResultReason) -> GameResult {
        GameResult { kind, reason }
    }

    pub fn win_for(winner: Side, reason: ResultReason) -> GameResult {
        GameResult::new(ResultKind::win_for(winner), reason)
    }

    pub fn is_terminal(self) -> bool {
        self.kind != ResultKind::None
    }

    /// `1-0 (timeout)` style string for result logs.
    pub fn describe(self) -> String {
        if self.reason == ResultReason::None {
            self.kind.pgn_token().to_string()
        } else {
            format!("{} ({})", self.kind.pgn_token(), self.reason.as_str())
        }
    }
}
