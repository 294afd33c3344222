//! What a front end is shown and how it is told.
//!
//! Both the local [`TurnController`](crate::session::TurnController) and the
//! networked [`OnlineGame`](crate::online::OnlineGame) produce a [`View`]; a
//! front end either reads it directly or has it pushed through a [`Surface`].

use crate::game::{Board, CELLS, Outcome, Score};

/// Rendering callbacks consumed by the game core. [`View::render_to`] calls
/// them in declaration order, so `set_interactive` always comes last.
pub trait Surface {
    fn render_board(&mut self, board: &Board);
    fn render_status(&mut self, status: &str);
    fn render_score(&mut self, score: Score);
    fn highlight_cells(&mut self, cells: &[u8]);
    fn set_interactive(&mut self, cells: [bool; CELLS]);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub board: Board,
    pub status: String,
    pub score: Score,
    pub highlight: Option<[u8; 3]>,
    pub interactive: [bool; CELLS],
    pub outcome: Option<Outcome>,
}

impl View {
    pub fn render_to(&self, surface: &mut impl Surface) {
        surface.render_board(&self.board);
        surface.render_status(&self.status);
        surface.render_score(self.score);
        surface.highlight_cells(self.highlight.as_ref().map_or(&[][..], |line| &line[..]));
        surface.set_interactive(self.interactive);
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Cells that accept a click: empty ones, and only when `enabled`.
pub(crate) fn clickable(board: &Board, enabled: bool) -> [bool; CELLS] {
    std::array::from_fn(|cell| enabled && board.cells[cell].is_none())
}
