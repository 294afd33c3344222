use std::ops::Not;

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

pub mod searcher;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub enum Mark {
    #[default]
    X,
    O,
}

/// The engine always plays second in the vs-engine mode.
pub const ENGINE_MARK: Mark = Mark::O;

pub const CELLS: usize = 9;

/// Every line that wins the game: rows, columns, diagonals.
pub const TRIPLES: [[u8; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

impl Not for Mark {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mark::X => f.pad("X"),
            Mark::O => f.pad("O"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Outcome {
    Win(Mark),
    Draw,
}

/// Running tally across rounds of one session or one networked record.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize)]
pub struct Score {
    pub wins_x: u32,
    pub wins_o: u32,
    pub draws: u32,
}

impl Score {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win(Mark::X) => self.wins_x += 1,
            Outcome::Win(Mark::O) => self.wins_o += 1,
            Outcome::Draw => self.draws += 1,
        }
    }

    pub fn total_games(&self) -> u32 {
        self.wins_x + self.wins_o + self.draws
    }

    /// The same tally seen after the two players trade marks.
    pub fn swapped(self) -> Self {
        Self {
            wins_x: self.wins_o,
            wins_o: self.wins_x,
            draws: self.draws,
        }
    }
}

/// Cells are indexed 0..9 row by row.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub struct Board {
    pub cells: [Option<Mark>; CELLS],
}

impl Board {
    pub fn from_cells(cells: [Option<Mark>; CELLS]) -> Self {
        Self { cells }
    }

    pub fn get(&self, cell: u8) -> Option<Mark> {
        self.cells.get(cell as usize).copied().flatten()
    }

    pub fn is_empty_at(&self, cell: u8) -> bool {
        (cell as usize) < CELLS && self.cells[cell as usize].is_none()
    }

    /// Marks an empty cell. Returns `false`, leaving the board untouched, when
    /// the cell is occupied or out of range.
    #[must_use]
    pub fn place(&mut self, cell: u8, mark: Mark) -> bool {
        if !self.is_empty_at(cell) {
            return false;
        }
        self.cells[cell as usize] = Some(mark);
        true
    }

    /// Only the searcher takes moves back, while backtracking.
    pub(crate) fn unset(&mut self, cell: u8) {
        self.cells[cell as usize] = None;
    }

    pub fn is_winning_for(&self, mark: Mark) -> bool {
        self.winning_line(mark).is_some()
    }

    pub fn winning_line(&self, mark: Mark) -> Option<[u8; 3]> {
        TRIPLES.iter().copied().find(|line| {
            line.iter()
                .all(|&cell| self.cells[cell as usize] == Some(mark))
        })
    }

    pub fn legal_moves(&self) -> ArrayVec<u8, CELLS> {
        (0..CELLS as u8)
            .filter(|&cell| self.cells[cell as usize].is_none())
            .collect()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }

    /// Result of the round after `mover` has just played.
    pub fn outcome_after(&self, mover: Mark) -> Option<Outcome> {
        if self.is_winning_for(mover) {
            Some(Outcome::Win(mover))
        } else if self.is_full() {
            Some(Outcome::Draw)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in self.cells.chunks(3) {
            for cell in row {
                match cell {
                    Some(mark) => write!(f, "{mark}")?,
                    None => f.write_str(".")?,
                }
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}
