use super::schedule::{MatchRecord, MatchState};
use super::standings::TourPlayer;
use crate::book::OpeningBook;
use crate::chess::ResultKind;
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};

/// Shared pairing inputs: the tournament RNG (colors, pair ids, byes)
/// and the opening book consulted for every appended record.
pub struct PairingCtx<'a> {
    pub rng: &'a mut ChaCha8Rng,
    pub book: &'a mut dyn OpeningBook,
    pub games_per_pair: u32,
}

/// Appends a record, fixing its `game_idx` to its schedule position
/// and drawing its opening.
pub fn add_record(schedule: &mut Vec<MatchRecord>, ctx: &mut PairingCtx, mut record: MatchRecord) {
    record.game_idx = schedule.len();
    let opening = ctx.book.random_start(ctx.rng);
    record.start_fen = opening.fen;
    record.start_moves = opening.moves;
    schedule.push(record);
}

/// All games of one engine pair: a coin flip decides who opens as
/// White, then colors alternate; every record shares one pair id.
fn add_pair(schedule: &mut Vec<MatchRecord>, ctx: &mut PairingCtx, a: &str, b: &str, round: u32) {
    let pair_id = ctx.rng.random::<u32>();
    let mut swapped = ctx.rng.random_bool(0.5);

    for _ in 0..ctx.games_per_pair {
        let (white, black) = if swapped { (b, a) } else { (a, b) };
        add_record(schedule, ctx, MatchRecord::new(white, black, round, pair_id));
        swapped = !swapped;
    }
}

/// Every unordered pair of participants meets `games_per_pair` times,
/// all in round 1.
pub fn create_round_robin(
    schedule: &mut Vec<MatchRecord>,
    ctx: &mut PairingCtx,
    names: &[String],
    shuffle: bool,
) {
    let mut list = names.to_vec();
    if shuffle {
        list.shuffle(ctx.rng);
    }

    for i in 0..list.len() {
        for j in i + 1..list.len() {
            add_pair(schedule, ctx, &list[i], &list[j], 1);
        }
    }
}

/// One knockout round: an odd field gives a not-yet-lucky player a
/// bye, the rest are seeded by Elo and paired top half against bottom
/// half.
pub fn create_knockout_round(
    schedule: &mut Vec<MatchRecord>,
    ctx: &mut PairingCtx,
    mut seeds: Vec<TourPlayer>,
    round: u32,
    lucky: &mut HashSet<String>,
) {
    if seeds.len() % 2 == 1 {
        let mut pick = 0;
        for _ in 0..10 {
            let k = ctx.rng.random_range(0..seeds.len());
            if !lucky.contains(&seeds[k].name) {
                pick = k;
                break;
            }
        }
        let bye = seeds.remove(pick);
        lucky.insert(bye.name.clone());
        info!("{} advances with a lucky bye in round {round}", bye.name);

        let mut record = MatchRecord::new(&bye.name, "", round, ctx.rng.random::<u32>());
        record.state = MatchState::Completed;
        record.result = ResultKind::Win;
        add_record(schedule, ctx, record);
    }

    seeds.sort_by(|a, b| b.elo.cmp(&a.elo));

    let n = seeds.len() / 2;
    for i in 0..n {
        let (a, b) = (seeds[i].name.clone(), seeds[i + n].name.clone());
        add_pair(schedule, ctx, &a, &b, round);
    }
}

pub fn last_round(schedule: &[MatchRecord]) -> u32 {
    schedule.iter().map(|r| r.round).max().unwrap_or(0)
}

/// Per-player wins and White-game counts across one pair's records.
fn pair_tally(records: &[&MatchRecord]) -> Vec<(String, u32, u32)> {
    let mut order: Vec<String> = Vec::new();
    let mut wins: HashMap<String, u32> = HashMap::new();
    let mut whites: HashMap<String, u32> = HashMap::new();

    for record in records {
        for (idx, name) in record.players.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            if !order.contains(name) {
                order.push(name.clone());
                wins.insert(name.clone(), 0);
                whites.insert(name.clone(), 0);
            }
            if idx == 0 {
                *whites.get_mut(name).unwrap() += 1;
                if record.result == ResultKind::Win {
                    *wins.get_mut(name).unwrap() += 1;
                }
            } else if record.result == ResultKind::Loss {
                *wins.get_mut(name).unwrap() += 1;
            }
        }
    }

    order
        .into_iter()
        .map(|name| {
            let w = wins[&name];
            let wh = whites[&name];
            (name, w, wh)
        })
        .collect()
}

/// Winner of a finished pair: more wins, ties broken by fewer games
/// as White.
fn pair_winner(records: &[&MatchRecord]) -> Option<String> {
    let tally = pair_tally(records);
    match tally.len() {
        0 => None,
        1 => Some(tally[0].0.clone()), // bye
        _ => {
            let (a, b) = (&tally[0], &tally[1]);
            if a.1 != b.1 {
                Some(if a.1 > b.1 { a.0.clone() } else { b.0.clone() })
            } else if a.2 != b.2 {
                Some(if a.2 < b.2 { a.0.clone() } else { b.0.clone() })
            } else {
                Some(a.0.clone())
            }
        }
    }
}

/// Winners of the newest round, in pair order, carrying their
/// configured Elo for the next seeding.
pub fn knockout_winners(schedule: &[MatchRecord], elo: &HashMap<String, i32>) -> Vec<TourPlayer> {
    let round = last_round(schedule);

    let mut pair_order: Vec<u32> = Vec::new();
    let mut pairs: HashMap<u32, Vec<&MatchRecord>> = HashMap::new();
    for record in schedule.iter().filter(|r| r.round == round) {
        if !pair_order.contains(&record.pair_id) {
            pair_order.push(record.pair_id);
        }
        pairs.entry(record.pair_id).or_default().push(record);
    }

    pair_order
        .into_iter()
        .filter_map(|pair_id| pair_winner(&pairs[&pair_id]))
        .map(|name| {
            let mut player = TourPlayer::named(&name);
            player.elo = elo.get(&name).copied().unwrap_or(0);
            player
        })
        .collect()
}

/// Invoked when `game_idx` completes: if its whole pair is done and
/// dead even (equal wins, equal White counts), one more game is owed.
/// The extension copies the first record's colors and is schedulable.
pub fn tie_extension(schedule: &[MatchRecord], game_idx: usize) -> Option<MatchRecord> {
    let record = schedule.get(game_idx)?;
    if record.is_bye() {
        return None;
    }
    let pair: Vec<&MatchRecord> = schedule
        .iter()
        .filter(|r| r.pair_id == record.pair_id)
        .collect();
    if pair
        .iter()
        .any(|r| r.state != MatchState::Completed && r.state != MatchState::Error)
    {
        return None;
    }

    let tally = pair_tally(&pair);
    if tally.len() != 2 || tally[0].1 != tally[1].1 || tally[0].2 != tally[1].2 {
        return None;
    }

    let base = pair[0];
    Some(MatchRecord::new(
        &base.players[0],
        &base.players[1],
        base.round,
        base.pair_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::NoBook;
    use rand::SeedableRng;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seeds(list: &[(&str, i32)]) -> Vec<TourPlayer> {
        list.iter()
            .map(|(name, elo)| {
                let mut p = TourPlayer::named(name);
                p.elo = *elo;
                p
            })
            .collect()
    }

    fn round_robin(seed: u64, players: &[&str], games_per_pair: u32) -> Vec<MatchRecord> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut book = NoBook;
        let mut ctx = PairingCtx {
            rng: &mut rng,
            book: &mut book,
            games_per_pair,
        };
        let mut schedule = Vec::new();
        create_round_robin(&mut schedule, &mut ctx, &names(players), false);
        schedule
    }

    #[test]
    fn round_robin_shape() {
        let schedule = round_robin(1, &["P1", "P2", "P3", "P4"], 2);
        assert_eq!(schedule.len(), 12);

        for (i, record) in schedule.iter().enumerate() {
            assert_eq!(record.game_idx, i);
            assert_eq!(record.round, 1);
            assert_eq!(record.state, MatchState::None);
        }

        // each unordered pair appears exactly twice, with alternating
        // colors under one pair id
        for chunk in schedule.chunks(2) {
            let (a, b) = (&chunk[0], &chunk[1]);
            assert_eq!(a.pair_id, b.pair_id);
            assert_eq!(a.players[0], b.players[1]);
            assert_eq!(a.players[1], b.players[0]);
        }

        let mut pair_ids: Vec<u32> = schedule.iter().map(|r| r.pair_id).collect();
        pair_ids.dedup();
        assert_eq!(pair_ids.len(), 6);
    }

    #[test]
    fn single_game_round_robin_counts() {
        let schedule = round_robin(2, &["a", "b", "c", "d"], 1);
        assert_eq!(schedule.len(), 4 * 3 / 2);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let one = round_robin(42, &["a", "b", "c"], 2);
        let two = round_robin(42, &["a", "b", "c"], 2);
        assert_eq!(one, two);
    }

    #[test]
    fn pairs_share_players_property() {
        let schedule = round_robin(7, &["a", "b", "c", "d", "e"], 3);
        let mut by_pair: HashMap<u32, HashSet<String>> = HashMap::new();
        for record in &schedule {
            let set = by_pair.entry(record.pair_id).or_default();
            if set.is_empty() {
                set.extend(record.players.iter().cloned());
            } else {
                let here: HashSet<String> = record.players.iter().cloned().collect();
                assert_eq!(*set, here);
            }
        }
    }

    fn knockout(seed: u64, players: &[(&str, i32)], games_per_pair: u32) -> Vec<MatchRecord> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut book = NoBook;
        let mut ctx = PairingCtx {
            rng: &mut rng,
            book: &mut book,
            games_per_pair,
        };
        let mut schedule = Vec::new();
        let mut lucky = HashSet::new();
        create_knockout_round(&mut schedule, &mut ctx, seeds(players), 0, &mut lucky);
        schedule
    }

    #[test]
    fn odd_knockout_gets_one_lucky_bye() {
        let schedule = knockout(3, &[("A", 0), ("B", 0), ("C", 0), ("D", 0), ("E", 0)], 1);
        assert_eq!(schedule.len(), 3);

        let byes: Vec<&MatchRecord> = schedule.iter().filter(|r| r.is_bye()).collect();
        assert_eq!(byes.len(), 1);
        assert_eq!(byes[0].state, MatchState::Completed);
        assert_eq!(byes[0].result, ResultKind::Win);
        assert!(!byes[0].players[0].is_empty());
        assert!(byes[0].players[1].is_empty());

        // winners: the bye plus one per real pair
        let winners = knockout_winners(&schedule_with_results(schedule), &HashMap::new());
        assert_eq!(winners.len(), 3);
    }

    /// Completes every schedulable record as a White win.
    fn schedule_with_results(mut schedule: Vec<MatchRecord>) -> Vec<MatchRecord> {
        for record in &mut schedule {
            if record.state == MatchState::None {
                record.state = MatchState::Completed;
                record.result = ResultKind::Win;
            }
        }
        schedule
    }

    #[test]
    fn knockout_seeds_top_half_against_bottom() {
        let schedule = knockout(
            5,
            &[("low", 400), ("top", 1000), ("mid", 800), ("third", 600)],
            1,
        );
        assert_eq!(schedule.len(), 2);
        let pair_of = |name: &str| {
            schedule
                .iter()
                .find(|r| r.players.contains(&name.to_string()))
                .unwrap()
        };
        assert!(pair_of("top").players.contains(&"third".to_string()));
        assert!(pair_of("mid").players.contains(&"low".to_string()));
    }

    #[test]
    fn knockout_halves_each_round() {
        let players: Vec<(String, i32)> = (0..8).map(|i| (format!("p{i}"), 0)).collect();
        let refs: Vec<(&str, i32)> = players.iter().map(|(n, e)| (n.as_str(), *e)).collect();
        let schedule = knockout(11, &refs, 2);
        assert_eq!(schedule.len(), 8);

        let done = schedule_with_results(schedule);
        let winners = knockout_winners(&done, &HashMap::new());
        assert_eq!(winners.len(), 4);
    }

    #[test]
    fn winner_tie_breaks_on_fewer_whites() {
        // wins equal one each, X had White twice
        let mut records = vec![
            MatchRecord::new("X", "Y", 0, 9),
            MatchRecord::new("Y", "X", 0, 9),
            MatchRecord::new("X", "Y", 0, 9),
        ];
        records[0].result = ResultKind::Win; // X
        records[1].result = ResultKind::Win; // Y
        records[2].result = ResultKind::Draw;
        for r in &mut records {
            r.state = MatchState::Completed;
        }
        let refs: Vec<&MatchRecord> = records.iter().collect();
        assert_eq!(pair_winner(&refs), Some("Y".to_string()));
    }

    #[test]
    fn tie_extension_appends_one_game() {
        // 1-0 then 0-1 with swapped colors: equal wins, equal whites
        let mut records = vec![MatchRecord::new("X", "Y", 0, 9), MatchRecord::new("Y", "X", 0, 9)];
        records[1].game_idx = 1;
        records[0].result = ResultKind::Win;
        records[1].result = ResultKind::Win;
        for r in &mut records {
            r.state = MatchState::Completed;
        }

        let extension = tie_extension(&records, 1).expect("tie should extend");
        assert_eq!(extension.state, MatchState::None);
        assert_eq!(extension.result, ResultKind::None);
        assert_eq!(extension.pair_id, 9);
        assert_eq!(extension.players, records[0].players);

        // not all games finished: no extension
        records[1].state = MatchState::Playing;
        assert!(tie_extension(&records, 0).is_none());
    }

    #[test]
    fn decided_pair_does_not_extend() {
        let mut records = vec![MatchRecord::new("X", "Y", 0, 4), MatchRecord::new("Y", "X", 0, 4)];
        records[1].game_idx = 1;
        records[0].result = ResultKind::Win; // X wins
        records[1].result = ResultKind::Loss; // X wins again
        for r in &mut records {
            r.state = MatchState::Completed;
        }
        assert!(tie_extension(&records, 1).is_none());
    }

    #[test]
    fn exhausted_luck_falls_back_to_first() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut book = NoBook;
        let mut ctx = PairingCtx {
            rng: &mut rng,
            book: &mut book,
            games_per_pair: 1,
        };
        let mut schedule = Vec::new();
        // everyone has already had a bye: the sampling gives up and
        // takes the first player
        let mut lucky: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        create_knockout_round(
            &mut schedule,
            &mut ctx,
            seeds(&[("A", 0), ("B", 0), ("C", 0)]),
            1,
            &mut lucky,
        );
        let bye = schedule.iter().find(|r| r.is_bye()).unwrap();
        assert_eq!(bye.players[0], "A");
    }

    #[test]
    fn lucky_bye_is_recorded() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut book = NoBook;
        let mut ctx = PairingCtx {
            rng: &mut rng,
            book: &mut book,
            games_per_pair: 1,
        };
        let mut schedule = Vec::new();
        let mut lucky = HashSet::new();
        create_knockout_round(
            &mut schedule,
            &mut ctx,
            seeds(&[("A", 0), ("B", 0), ("C", 0)]),
            0,
            &mut lucky,
        );
        let bye = schedule.iter().find(|r| r.is_bye()).unwrap();
        assert!(lucky.contains(&bye.players[0]));
        assert_eq!(lucky.len(), 1);
    }
}
