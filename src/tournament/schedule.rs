use super::TourType;
use crate::chess::{Move, ResultKind};
use crate::tc::{TimeControl, TimeControlSpec};
use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum MatchState {
    #[default]
    None,
    Playing,
    Completed,
    Error,
}

/// One scheduled game. `game_idx` equals the record's position in the
/// schedule at creation time; every record of the same engine pairing
/// (colors, rematches, tie extensions) shares a `pair_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    pub state: MatchState,
    pub players: [String; 2],
    pub start_fen: Option<String>,
    pub start_moves: Vec<Move>,
    pub result: ResultKind,
    pub game_idx: usize,
    pub round: u32,
    pub pair_id: u32,
}

impl MatchRecord {
    pub fn new(white: &str, black: &str, round: u32, pair_id: u32) -> MatchRecord {
        MatchRecord {
            state: MatchState::None,
            players: [white.to_string(), black.to_string()],
            start_fen: None,
            start_moves: Vec::new(),
            result: ResultKind::None,
            game_idx: 0,
            round,
            pair_id,
        }
    }

    pub fn swap_players(&mut self) {
        self.players.swap(0, 1);
    }

    pub fn valid(&self) -> bool {
        !self.players[0].is_empty() && !self.players[1].is_empty()
    }

    /// Bye records carry one empty side and are born completed.
    pub fn is_bye(&self) -> bool {
        self.players[0].is_empty() || self.players[1].is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RecordJson {
    players: [String; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    start_fen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_moves: Option<Vec<u32>>,
    result: String,
    game_idx: usize,
    round: u32,
    pair_id: u32,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScheduleJson {
    #[serde(rename = "type")]
    tour_type: String,
    time_control: TimeControlSpec,
    elapsed: u64,
    record_list: Vec<RecordJson>,
}

#[derive(Debug)]
pub struct LoadedSchedule {
    pub tour_type: TourType,
    pub time_control: TimeControl,
    pub elapsed: u64,
    pub records: Vec<MatchRecord>,
}

fn record_to_json(record: &MatchRecord) -> RecordJson {
    RecordJson {
        players: record.players.clone(),
        start_fen: record.start_fen.clone(),
        start_moves: if record.start_moves.is_empty() {
            None
        } else {
            Some(record.start_moves.iter().map(|m| m.pack()).collect())
        },
        result: record.result.pgn_token().to_string(),
        game_idx: record.game_idx,
        round: record.round,
        pair_id: record.pair_id,
    }
}

fn record_from_json(json: RecordJson) -> Option<MatchRecord> {
    let result = ResultKind::from_pgn_token(&json.result)?;
    let start_moves = match json.start_moves {
        Some(packed) => packed
            .into_iter()
            .map(Move::unpack)
            .collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };
    Some(MatchRecord {
        // The file never records an in-flight game: anything without a
        // result comes back schedulable, which is exactly the resume
        // demotion of `playing` records.
        state: if result == ResultKind::None {
            MatchState::None
        } else {
            MatchState::Completed
        },
        players: json.players,
        start_fen: json.start_fen,
        start_moves,
        result,
        game_idx: json.game_idx,
        round: json.round,
        pair_id: json.pair_id,
    })
}

/// Rewrites the whole schedule. Write-to-temp-then-rename so a crash
/// mid-save leaves either the previous or the new file readable.
pub fn save(
    path: &Path,
    tour_type: TourType,
    time_control: TimeControl,
    elapsed: u64,
    records: &[MatchRecord],
) -> Result<()> {
    let json = ScheduleJson {
        tour_type: tour_type.as_str().to_string(),
        time_control: TimeControlSpec::from(time_control),
        elapsed,
        record_list: records.iter().map(record_to_json).collect(),
    };
    let text = serde_json::to_string_pretty(&json)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).with_context(|| format!("cannot write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("cannot rename onto {}", path.display()))?;
    Ok(())
}

/// A missing or corrupt file yields `None`; resume silently declines
/// and the tournament starts fresh.
pub fn load(path: &Path) -> Option<LoadedSchedule> {
    let text = fs::read_to_string(path).ok()?;
    let json: ScheduleJson = match serde_json::from_str(&text) {
        Ok(json) => json,
        Err(err) => {
            warn!("schedule file {} unreadable: {err}", path.display());
            return None;
        }
    };

    let tour_type = TourType::from_str(&json.tour_type)?;
    let time_control = json.time_control.to_time_control()?;
    let records = json
        .record_list
        .into_iter()
        .map(record_from_json)
        .collect::<Option<Vec<_>>>()?;

    Some(LoadedSchedule {
        tour_type,
        time_control,
        elapsed: json.elapsed,
        records,
    })
}

pub fn remove(path: &Path) {
    let _ = fs::remove_file(path);
}

pub fn uncompleted(records: &[MatchRecord]) -> usize {
    records
        .iter()
        .filter(|r| r.state != MatchState::Completed)
        .count()
}

/// Interactive resume decision; `y`/`yes` resumes, `n`/`no` declines,
/// anything else re-prompts.
pub fn ask_resume(uncompleted: usize, total: usize) -> bool {
    ask_resume_from(
        &mut std::io::stdin().lock(),
        &mut std::io::stdout(),
        uncompleted,
        total,
    )
}

fn ask_resume_from(
    input: &mut impl BufRead,
    output: &mut impl Write,
    uncompleted: usize,
    total: usize,
) -> bool {
    loop {
        let _ = write!(
            output,
            "There are {uncompleted} (of {total}) uncompleted matches from previous tournament! Do you want to resume? (y/n) "
        );
        let _ = output.flush();

        let mut line = String::new();
        if input.read_line(&mut line).is_err() || line.is_empty() {
            return false;
        }
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return true,
            "n" | "no" => return false,
            _ => continue,
        }
    }
}
