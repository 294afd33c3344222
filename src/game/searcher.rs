use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Board, Mark};

const WIN_SCORE: i32 = 10;
const LOSS_SCORE: i32 = -10;
const DRAW_SCORE: i32 = 0;

/// Chance that `Medium` plays the searched move instead of a random one.
const MEDIUM_OPTIMAL_PROBABILITY: f64 = 0.7;

/// Opening pool for an empty board: center and the four corners.
const OPENINGS: [u8; 5] = [4, 0, 2, 6, 8];

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Easy => f.pad("easy"),
            Difficulty::Medium => f.pad("medium"),
            Difficulty::Hard => f.pad("hard"),
        }
    }
}

/// Exhaustive minimax over the whole remaining game tree, scored from the
/// point of view of `player`.
pub struct Searcher {
    pub player: Mark,
}

impl Searcher {
    /// Best move for `player`, who is to move, with its minimax value.
    /// Ties go to the lowest cell index.
    pub fn search(board: &Board, player: Mark) -> Option<(u8, i32)> {
        let searcher = Self { player };
        let moves = board.legal_moves();

        if let Some(value) = searcher.terminal(board) {
            debug!("value" = value, "search_on_terminal_board");
            return None;
        }

        let scored: Vec<(u8, i32)> = moves
            .as_slice()
            .par_iter()
            .map(|&cell| {
                let mut child = *board;
                child.cells[cell as usize] = Some(player);
                let value = searcher.branch(&mut child, !player);
                debug!("cell" = cell, "value" = value, "computer_move_opportunity");
                (cell, value)
            })
            .collect();

        pick(&scored, true)
    }

    fn terminal(&self, node: &Board) -> Option<i32> {
        if node.is_winning_for(!self.player) {
            Some(LOSS_SCORE)
        } else if node.is_winning_for(self.player) {
            Some(WIN_SCORE)
        } else if node.is_full() {
            Some(DRAW_SCORE)
        } else {
            None
        }
    }

    fn branch(&self, node: &mut Board, mover: Mark) -> i32 {
        if let Some(value) = self.terminal(node) {
            return value;
        }

        let mut scored = arrayvec::ArrayVec::<(u8, i32), 9>::new();
        for cell in node.legal_moves() {
            node.cells[cell as usize] = Some(mover);
            scored.push((cell, self.branch(node, !mover)));
            node.unset(cell);
        }

        pick(&scored, mover == self.player).map_or(DRAW_SCORE, |(_, value)| value)
    }
}

/// First strictly-best entry in cell order.
fn pick(scored: &[(u8, i32)], maximizing: bool) -> Option<(u8, i32)> {
    let mut best: Option<(u8, i32)> = None;
    for &(cell, value) in scored {
        let better = match best {
            None => true,
            Some((_, best_value)) if maximizing => value > best_value,
            Some((_, best_value)) => value < best_value,
        };
        if better {
            best = Some((cell, value));
        }
    }
    best
}

/// Picks the engine's move for `mark`. `None` only when the board is full,
/// which correct turn sequencing never allows.
pub fn choose_move<R: Rng + ?Sized>(
    board: &Board,
    mark: Mark,
    difficulty: Difficulty,
    rng: &mut R,
) -> Option<u8> {
    let moves = board.legal_moves();
    if moves.is_empty() {
        error!("board" = %board, "engine_invoked_on_full_board");
        return None;
    }

    let random = |rng: &mut R| moves[rng.random_range(0..moves.len())];

    if moves.len() == moves.capacity() {
        return Some(OPENINGS[rng.random_range(0..OPENINGS.len())]);
    }

    let cell = match difficulty {
        Difficulty::Easy => random(rng),
        Difficulty::Medium if rng.random_bool(MEDIUM_OPTIMAL_PROBABILITY) => {
            searched(board, mark).unwrap_or_else(|| random(rng))
        }
        Difficulty::Medium => random(rng),
        Difficulty::Hard => searched(board, mark).unwrap_or_else(|| random(rng)),
    };
    debug!("cell" = cell, "difficulty" = %difficulty, "mark" = %mark, "engine_move_chosen");
    Some(cell)
}

fn searched(board: &Board, mark: Mark) -> Option<u8> {
    Searcher::search(board, mark).map(|(cell, _)| cell)
}
