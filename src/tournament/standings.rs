use super::schedule::MatchRecord;
use crate::chess::{ResultKind, Side};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Accumulated score line for one participant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TourPlayer {
    pub name: String,
    pub games: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub elo: i32,
    pub white_cnt: u32,
}

impl TourPlayer {
    pub fn named(name: &str) -> TourPlayer {
        TourPlayer {
            name: name.to_string(),
            ..TourPlayer::default()
        }
    }

    pub fn score(&self) -> f64 {
        self.wins as f64 + self.draws as f64 / 2.0
    }

    /// Strict weak order: fewer wins ranks below; equal wins break on
    /// more losses, then on fewer draws.
    pub fn smaller(&self, other: &TourPlayer) -> bool {
        self.wins < other.wins
            || (self.wins == other.wins
                && (self.losses > other.losses
                    || (self.losses == other.losses && self.draws < other.draws)))
    }
}

/// Walks completed records into per-player tallies, best first. Bye
/// sides (empty names) are skipped.
pub fn standings(records: &[MatchRecord]) -> Vec<TourPlayer> {
    let mut map: BTreeMap<String, TourPlayer> = BTreeMap::new();

    for record in records {
        if record.result == ResultKind::None {
            continue;
        }
        for side in [Side::White, Side::Black] {
            let name = &record.players[side.index()];
            if name.is_empty() {
                continue;
            }
            let entry = map
                .entry(name.clone())
                .or_insert_with(|| TourPlayer::named(name));
            entry.games += 1;
            if side == Side::White {
                entry.white_cnt += 1;
            }
            match record.result {
                ResultKind::Win => {
                    if side == Side::White {
                        entry.wins += 1;
                    } else {
                        entry.losses += 1;
                    }
                }
                ResultKind::Loss => {
                    if side == Side::Black {
                        entry.wins += 1;
                    } else {
                        entry.losses += 1;
                    }
                }
                ResultKind::Draw => entry.draws += 1,
                ResultKind::None => unreachable!(),
            }
        }
    }

    let mut list: Vec<TourPlayer> = map.into_values().collect();
    list.sort_by(|a, b| {
        if b.smaller(a) {
            std::cmp::Ordering::Less
        } else if a.smaller(b) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
    list
}

pub fn format_table(list: &[TourPlayer]) -> String {
    let name_width = list
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "rank {:name_width$}  games   win%  draw%  loss%  score",
        "name"
    );
    for (i, p) in list.iter().enumerate() {
        let d = p.games.max(1) as f64;
        let _ = writeln!(
            out,
            "{:>4} {:name_width$}  {:>5}  {:>5.1}  {:>5.1}  {:>5.1}  {:>5.1}",
            i + 1,
            p.name,
            p.games,
            p.wins as f64 * 100.0 / d,
            p.draws as f64 * 100.0 / d,
            p.losses as f64 * 100.0 / d,
            p.score()
        );
    }
    out
}
