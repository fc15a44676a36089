use crate::chess::Move;
use anyhow::{Context, Result};
use rand::prelude::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::Path;

/// Starting point handed to a match record: a position and optionally
/// book moves to play out before the engines take over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Opening {
    pub fen: Option<String>,
    pub moves: Vec<Move>,
}

pub trait OpeningBook: Send {
    fn random_start(&mut self, rng: &mut ChaCha8Rng) -> Opening;
}

/// No book configured: every game starts from the standard position.
pub struct NoBook;

impl OpeningBook for NoBook {
    fn random_start(&mut self, _rng: &mut ChaCha8Rng) -> Opening {
        Opening::default()
    }
}

/// One FEN per line; `#` lines and blanks ignored.
pub struct FenBook {
    positions: Vec<String>,
}

impl FenBook {
    pub fn open(path: &Path) -> Result<FenBook> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read opening book {}", path.display()))?;
        let positions: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        anyhow::ensure!(
            !positions.is_empty(),
            "opening book {} has no positions",
            path.display()
        );
        Ok(FenBook { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl OpeningBook for FenBook {
    fn random_start(&mut self, rng: &mut ChaCha8Rng) -> Opening {
        match self.positions.choose(rng) {
            Some(fen) => Opening {
                fen: Some(fen.clone()),
                moves: Vec::new(),
            },
            None => Opening::default(),
        }
    }
}
