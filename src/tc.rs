use crate::chess::Side;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Instant};

/// Grace added to a side's clock before declaring timeout, absorbing
/// scheduler and pipe jitter that would otherwise be charged to the
/// engine. Seconds.
pub const DEFAULT_MARGIN: f64 = 0.8;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum TimeControl {
    Infinite,
    Depth(u32),
    MoveTime(f64),
    Standard {
        /// Moves per time control, 0 for the whole game.
        moves: u32,
        base: f64,
        increment: f64,
        margin: f64,
    },
}

impl TimeControl {
    pub fn parse(s: &str) -> Option<TimeControl> {
        None.or_else(|| Self::try_parse_fixed(s))
            .or_else(|| Self::try_parse_movetime(s))
            .or_else(|| Self::try_parse_depth(s))
            .or_else(|| Self::try_parse_standard(s))
            .filter(|tc| tc.valid())
    }

    fn try_parse_fixed(s: &str) -> Option<TimeControl> {
        match s {
            "inf" | "infinite" => Some(TimeControl::Infinite),
            _ => None,
        }
    }

    fn try_parse_movetime(s: &str) -> Option<TimeControl> {
        let re = Regex::new(r"^movetime=([0-9.]+)s?$").unwrap();
        let captures = re.captures(s)?;
        let (_, [secs]) = captures.extract();
        Some(TimeControl::MoveTime(secs.parse::<f64>().ok()?))
    }

    fn try_parse_depth(s: &str) -> Option<TimeControl> {
        let re = Regex::new(r"^depth=([0-9]+)$").unwrap();
        let captures = re.captures(s)?;
        let (_, [depth]) = captures.extract();
        Some(TimeControl::Depth(depth.parse::<u32>().ok()?))
    }

    /// `40/60+0.6` style: moves per control, base seconds, increment.
    fn try_parse_standard(s: &str) -> Option<TimeControl> {
        let re =
            Regex::new(r"^(?:(?<moves>[0-9]+)/)?(?<base>[0-9.]+)(?:\+(?<incr>[0-9.]+))?$").unwrap();
        let captures = re.captures(s)?;

        let moves = match captures.name("moves") {
            Some(m) => m.as_str().parse::<u32>().ok()?,
            None => 0,
        };
        let base = captures.name("base")?.as_str().parse::<f64>().ok()?;
        let increment = match captures.name("incr") {
            Some(m) => m.as_str().parse::<f64>().ok()?,
            None => 0.0,
        };

        Some(TimeControl::Standard {
            moves,
            base,
            increment,
            margin: DEFAULT_MARGIN,
        })
    }

    pub fn with_margin(self, new_margin: f64) -> TimeControl {
        match self {
            TimeControl::Standard {
                moves,
                base,
                increment,
                ..
            } => TimeControl::Standard {
                moves,
                base,
                increment,
                margin: new_margin,
            },
            other => other,
        }
    }

    pub fn valid(&self) -> bool {
        match *self {
            TimeControl::Infinite => true,
            TimeControl::Depth(depth) => depth > 0,
            TimeControl::MoveTime(time) => time > 0.0,
            TimeControl::Standard {
                base,
                increment,
                margin,
                ..
            } => base > 0.0 && increment >= 0.0 && margin >= 0.0,
        }
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TimeControl::Infinite => write!(f, "infinite"),
            TimeControl::Depth(depth) => write!(f, "depth={depth}"),
            TimeControl::MoveTime(time) => write!(f, "movetime={time}s"),
            TimeControl::Standard {
                moves,
                base,
                increment,
                ..
            } => {
                if moves > 0 {
                    write!(f, "{moves}/")?;
                }
                write!(f, "{base}")?;
                if increment > 0.0 {
                    write!(f, "+{increment}")?;
                }
                Ok(())
            }
        }
    }
}

/// Schedule-file shape of a time control.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeControlSpec {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moves: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl From<TimeControl> for TimeControlSpec {
    fn from(tc: TimeControl) -> TimeControlSpec {
        let mut spec = TimeControlSpec {
            mode: String::new(),
            moves: None,
            time: None,
            increment: None,
            margin: None,
            depth: None,
        };
        match tc {
            TimeControl::Infinite => spec.mode = "infinite".into(),
            TimeControl::Depth(depth) => {
                spec.mode = "depth".into();
                spec.depth = Some(depth);
            }
            TimeControl::MoveTime(time) => {
                spec.mode = "movetime".into();
                spec.time = Some(time);
            }
            TimeControl::Standard {
                moves,
                base,
                increment,
                margin,
            } => {
                spec.mode = "standard".into();
                spec.moves = Some(moves);
                spec.time = Some(base);
                spec.increment = Some(increment);
                spec.margin = Some(margin);
            }
        }
        spec
    }
}

impl TimeControlSpec {
    pub fn to_time_control(&self) -> Option<TimeControl> {
        let tc = match self.mode.as_str() {
            "infinite" => TimeControl::Infinite,
            "depth" => TimeControl::Depth(self.depth?),
            "movetime" => TimeControl::MoveTime(self.time?),
            "standard" => TimeControl::Standard {
                moves: self.moves.unwrap_or(0),
                base: self.time?,
                increment: self.increment.unwrap_or(0.0),
                margin: self.margin.unwrap_or(0.0),
            },
            _ => return None,
        };
        tc.valid().then_some(tc)
    }
}

/// Numbers an engine needs for its `go` command, snapshotted at the
/// moment thinking starts.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum GoSpec {
    Infinite,
    Depth(u32),
    MoveTimeMs(u64),
    Standard {
        wtime_ms: u64,
        btime_ms: u64,
        winc_ms: u64,
        binc_ms: u64,
        movestogo: Option<u32>,
    },
}

/// Per-game clock: one budget per side, mutated only at move
/// boundaries and on the timeout poll.
#[derive(Clone, Debug)]
pub struct GameClock {
    tc: TimeControl,
    time_left: [f64; 2],
    /// Elapsed seconds observed by the most recent timeout check.
    pub last_query_consumed: f64,
    move_start: Instant,
}

impl GameClock {
    pub fn new(tc: TimeControl) -> GameClock {
        GameClock {
            tc,
            time_left: [0.0; 2],
            last_query_consumed: 0.0,
            move_start: Instant::now(),
        }
    }

    pub fn time_control(&self) -> TimeControl {
        self.tc
    }

    pub fn time_left(&self, side: Side) -> f64 {
        self.time_left[side.index()]
    }

    /// Called when `side` starts thinking at half-move `ply`. Resets
    /// both budgets on the first move (every move in movetime mode)
    /// and applies the moves-per-control refill when the mover has
    /// just completed a control.
    pub fn begin_move(&mut self, side: Side, ply: usize) {
        match self.tc {
            TimeControl::MoveTime(time) => {
                self.time_left = [time; 2];
            }
            TimeControl::Standard {
                moves, base: time, ..
            } => {
                if ply == 0 {
                    self.time_left = [time; 2];
                } else if moves > 0 {
                    let completed = (ply / 2) as u32;
                    if completed > 0 && completed % moves == 0 {
                        self.time_left[side.index()] += time;
                    }
                }
            }
            TimeControl::Infinite | TimeControl::Depth(_) => {}
        }
        self.move_start = Instant::now();
    }

    /// Charges a finished move against `side` and applies the increment.
    pub fn end_move(&mut self, side: Side, consumed: f64, _ply: usize) {
        if let TimeControl::Standard { increment, .. } = self.tc {
            self.time_left[side.index()] += increment - consumed;
        }
    }

    pub fn is_time_over(&mut self, side: Side) -> bool {
        let consumed = self.move_start.elapsed().as_secs_f64();
        self.check_over(side, consumed)
    }

    /// Timeout rule against an explicit consumed figure; `is_time_over`
    /// feeds it the live stopwatch.
    pub fn check_over(&mut self, side: Side, consumed: f64) -> bool {
        let margin = match self.tc {
            TimeControl::Standard { margin, .. } => margin,
            TimeControl::MoveTime(_) => 0.0,
            TimeControl::Infinite | TimeControl::Depth(_) => return false,
        };
        self.last_query_consumed = consumed;
        consumed >= self.time_left[side.index()] + margin
    }

    pub fn go_spec(&self, ply: usize) -> GoSpec {
        match self.tc {
            TimeControl::Infinite => GoSpec::Infinite,
            TimeControl::Depth(depth) => GoSpec::Depth(depth),
            TimeControl::MoveTime(time) => GoSpec::MoveTimeMs((time * 1000.0) as u64),
            TimeControl::Standard {
                moves, increment, ..
            } => {
                let ms = |secs: f64| (secs.max(0.0) * 1000.0) as u64;
                let movestogo = if moves > 0 {
                    Some(moves - (ply as u32 / 2) % moves)
                } else {
                    None
                };
                GoSpec::Standard {
                    wtime_ms: ms(self.time_left[0]),
                    btime_ms: ms(self.time_left[1]),
                    winc_ms: ms(increment),
                    binc_ms: ms(increment),
                    movestogo,
                }
            }
        }
    }
}
