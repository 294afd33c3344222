//! Turn sequencing for the two local modes: hot-seat and human against the
//! engine.
//!
//! The engine's "thinking" is not a timer inside the controller. When the
//! engine is due, [`TurnController::apply_move`] hands back an
//! [`EngineRequest`]; whoever runs the engine answers later through
//! [`TurnController::apply_engine_move`]. Every request carries a [`Ticket`]
//! and an answer is only accepted while that ticket is still the pending one,
//! so a reply that arrives after a reset or after the session was replaced is
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::game::searcher::Difficulty;
use crate::game::{Board, CELLS, ENGINE_MARK, Mark, Outcome, Score};
use crate::view::{View, clickable};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Mode {
    LocalDuel,
    LocalVsEngine,
    Networked,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TurnState {
    Awaiting(Mark),
    Finished(Outcome),
}

#[derive(Clone, Debug)]
pub struct Session {
    pub mode: Mode,
    pub board: Board,
    pub active_mark: Mark,
    pub active: bool,
    pub names: [String; 2],
    pub difficulty: Difficulty,
    pub score: Score,
    pub winning_line: Option<[u8; 3]>,
}

impl Session {
    pub fn new(mode: Mode, names: [String; 2], difficulty: Difficulty) -> Self {
        Self {
            mode,
            board: Board::default(),
            active_mark: Mark::X,
            active: true,
            names,
            difficulty,
            score: Score::default(),
            winning_line: None,
        }
    }

    pub fn name(&self, mark: Mark) -> &str {
        match mark {
            Mark::X => &self.names[0],
            Mark::O => &self.names[1],
        }
    }

    pub fn engine_mark(&self) -> Option<Mark> {
        (self.mode == Mode::LocalVsEngine).then_some(ENGINE_MARK)
    }
}

/// Identifies one outstanding engine request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ticket {
    session: u64,
    seq: u64,
}

#[derive(Clone, Debug)]
pub struct EngineRequest {
    pub ticket: Ticket,
    pub board: Board,
    pub mark: Mark,
    pub difficulty: Difficulty,
    pub delay: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct EngineReply {
    pub ticket: Ticket,
    pub cell: Option<u8>,
}

#[derive(Clone, Debug)]
pub enum Applied {
    /// Nothing changed.
    Rejected,
    /// The turn passed to the other mark.
    Continue,
    /// The turn passed to the engine; run this request and answer it.
    EngineToMove(EngineRequest),
    Finished(Outcome),
}

pub struct TurnController {
    session: Session,
    state: TurnState,
    pending: Option<Ticket>,
    id: u64,
    round: u64,
    requests: u64,
    thinking_delay: Duration,
}

impl TurnController {
    pub fn new(session: Session, thinking_delay: Duration) -> Self {
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        info!("session" = id, "mode" = ?session.mode, "session_started");
        Self {
            state: TurnState::Awaiting(session.active_mark),
            session,
            pending: None,
            id,
            round: 0,
            requests: 0,
            thinking_delay,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn board(&self) -> &Board {
        &self.session.board
    }

    pub fn is_over(&self) -> bool {
        matches!(self.state, TurnState::Finished(_))
    }

    pub fn is_thinking(&self) -> bool {
        self.pending.is_some()
    }

    pub fn legal_moves(&self) -> ArrayVec<u8, CELLS> {
        if self.accepts_input() {
            self.session.board.legal_moves()
        } else {
            ArrayVec::new()
        }
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.session.difficulty = difficulty;
    }

    /// A move from the local player whose turn it is.
    pub fn apply_move(&mut self, cell: u8) -> Applied {
        if !self.accepts_input() {
            debug!("cell" = cell, "move_ignored_input_disabled");
            return Applied::Rejected;
        }
        self.place(cell)
    }

    /// The engine's answer to an earlier [`EngineRequest`].
    pub fn apply_engine_move(&mut self, reply: EngineReply) -> Applied {
        if self.pending != Some(reply.ticket) {
            debug!("ticket" = ?reply.ticket, "stale_engine_reply");
            return Applied::Rejected;
        }
        self.pending = None;

        let Some(cell) = reply.cell else {
            error!("board" = %self.session.board, "no_computer_move");
            return Applied::Rejected;
        };
        match self.place(cell) {
            Applied::Rejected => {
                error!("cell" = cell, "computer_move_invalid");
                Applied::Rejected
            }
            applied => applied,
        }
    }

    /// Starts a new round. The tally survives only when `preserve_score`.
    pub fn reset(&mut self, preserve_score: bool) {
        self.round += 1;
        self.pending = None;
        self.session.board = Board::default();
        self.session.active_mark = Mark::X;
        self.session.active = true;
        self.session.winning_line = None;
        if !preserve_score {
            self.session.score = Score::default();
        }
        self.state = TurnState::Awaiting(Mark::X);
        info!("session" = self.id, "round" = self.round, "preserve_score" = preserve_score, "session_reset");
    }

    pub fn view(&self) -> View {
        let session = &self.session;
        let status = match self.state {
            TurnState::Finished(Outcome::Win(mark)) => {
                format!("{} ({mark}) wins!", session.name(mark))
            }
            TurnState::Finished(Outcome::Draw) => "It's a draw!".to_owned(),
            TurnState::Awaiting(mark) if self.pending.is_some() => {
                format!("{} is thinking...", session.name(mark))
            }
            TurnState::Awaiting(mark) => format!("{}'s turn ({mark})", session.name(mark)),
        };

        View {
            board: session.board,
            status,
            score: session.score,
            highlight: session.winning_line,
            interactive: clickable(&session.board, self.accepts_input()),
            outcome: match self.state {
                TurnState::Finished(outcome) => Some(outcome),
                TurnState::Awaiting(_) => None,
            },
        }
    }

    fn accepts_input(&self) -> bool {
        self.session.active
            && self.pending.is_none()
            && self.session.engine_mark() != Some(self.session.active_mark)
    }

    fn place(&mut self, cell: u8) -> Applied {
        let mover = self.session.active_mark;
        if !self.session.active || !self.session.board.place(cell, mover) {
            debug!("cell" = cell, "move_ignored");
            return Applied::Rejected;
        }
        info!("cell" = cell, "mark" = %mover, "move_done");

        if let Some(outcome) = self.session.board.outcome_after(mover) {
            self.session.active = false;
            self.session.score.record(outcome);
            self.session.winning_line = self.session.board.winning_line(mover);
            self.state = TurnState::Finished(outcome);
            info!("outcome" = ?outcome, "score" = ?self.session.score, "round_finished");
            return Applied::Finished(outcome);
        }

        self.session.active_mark = !mover;
        self.state = TurnState::Awaiting(!mover);

        if self.session.engine_mark() == Some(!mover) {
            self.requests += 1;
            let ticket = Ticket {
                session: self.id,
                seq: self.requests,
            };
            self.pending = Some(ticket);
            return Applied::EngineToMove(EngineRequest {
                ticket,
                board: self.session.board,
                mark: !mover,
                difficulty: self.session.difficulty,
                delay: self.thinking_delay,
            });
        }

        Applied::Continue
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::game::searcher::choose_move;
    use crate::view::tests::Recorder;

    fn names() -> [String; 2] {
        ["Ann".to_owned(), "Bob".to_owned()]
    }

    fn duel() -> TurnController {
        TurnController::new(
            Session::new(Mode::LocalDuel, names(), Difficulty::Medium),
            Duration::ZERO,
        )
    }

    fn vs_engine(difficulty: Difficulty) -> TurnController {
        TurnController::new(
            Session::new(Mode::LocalVsEngine, names(), difficulty),
            Duration::from_millis(600),
        )
    }

    fn answer(controller: &mut TurnController, request: &EngineRequest) -> Applied {
        let mut rng = StdRng::seed_from_u64(9);
        let cell = choose_move(&request.board, request.mark, request.difficulty, &mut rng);
        controller.apply_engine_move(EngineReply {
            ticket: request.ticket,
            cell,
        })
    }

    #[test]
    fn only_the_engine_mode_has_an_engine() {
        for (mode, engine) in [
            (Mode::LocalDuel, None),
            (Mode::LocalVsEngine, Some(Mark::O)),
            (Mode::Networked, None),
        ] {
            assert_eq!(Session::new(mode, names(), Difficulty::Hard).engine_mark(), engine);
        }
    }

    #[test]
    fn nine_quiet_moves_draw_once() {
        let mut controller = duel();
        let moves = [0, 1, 2, 4, 3, 5, 7, 6, 8];
        for (i, &cell) in moves.iter().enumerate() {
            assert!(!controller.is_over(), "finished early at move {i}");
            let applied = controller.apply_move(cell);
            if i + 1 < moves.len() {
                assert!(matches!(applied, Applied::Continue));
            } else {
                assert!(matches!(applied, Applied::Finished(Outcome::Draw)));
            }
        }
        assert_eq!(controller.state(), TurnState::Finished(Outcome::Draw));
        assert_eq!(controller.session().score.draws, 1);
        assert!(matches!(controller.apply_move(0), Applied::Rejected));
        assert_eq!(controller.session().score.draws, 1);
    }

    #[test]
    fn occupied_cell_is_ignored() {
        let mut controller = duel();
        controller.apply_move(4);
        let before = *controller.board();
        assert!(matches!(controller.apply_move(4), Applied::Rejected));
        assert_eq!(*controller.board(), before);
        assert_eq!(controller.state(), TurnState::Awaiting(Mark::O));
    }

    #[test]
    fn win_scores_and_highlights() {
        let mut controller = duel();
        for cell in [0, 3, 1, 4] {
            controller.apply_move(cell);
        }
        assert!(matches!(controller.apply_move(2), Applied::Finished(Outcome::Win(Mark::X))));

        let mut recorder = Recorder::default();
        controller.view().render_to(&mut recorder);
        assert_eq!(recorder.highlight, vec![0, 1, 2]);
        assert_eq!(recorder.status, "Ann (X) wins!");
        assert_eq!(recorder.score.wins_x, 1);
        assert!(recorder.interactive.iter().all(|&c| !c));
        assert!(controller.legal_moves().is_empty());
    }

    #[test]
    fn reset_keeps_or_clears_the_tally() {
        let mut controller = duel();
        for cell in [0, 3, 1, 4, 2] {
            controller.apply_move(cell);
        }
        controller.reset(true);
        assert_eq!(controller.session().score.wins_x, 1);
        assert!(controller.board().is_blank());
        assert_eq!(controller.state(), TurnState::Awaiting(Mark::X));
        assert_eq!(controller.view().highlight, None);

        controller.reset(false);
        assert_eq!(controller.session().score, Score::default());
    }

    #[test]
    fn engine_answers_through_a_ticket() {
        let mut controller = vs_engine(Difficulty::Hard);
        let Applied::EngineToMove(request) = controller.apply_move(4) else {
            panic!("engine should be asked to move");
        };
        assert_eq!(request.mark, Mark::O);
        assert_eq!(request.delay, Duration::from_millis(600));
        assert!(controller.is_thinking());
        assert!(controller.view().status.contains("thinking"));

        // Input stays disabled while the engine thinks.
        assert!(matches!(controller.apply_move(0), Applied::Rejected));
        assert!(controller.view().interactive.iter().all(|&c| !c));

        assert!(matches!(answer(&mut controller, &request), Applied::Continue));
        let corners = [0, 2, 6, 8];
        assert!(corners.iter().any(|&c| controller.board().get(c) == Some(Mark::O)));
        assert_eq!(controller.state(), TurnState::Awaiting(Mark::X));
        assert!(!controller.is_thinking());
    }

    #[test]
    fn reply_after_reset_is_dropped() {
        let mut controller = vs_engine(Difficulty::Easy);
        let Applied::EngineToMove(request) = controller.apply_move(0) else {
            panic!("engine should be asked to move");
        };
        controller.reset(true);
        assert!(matches!(answer(&mut controller, &request), Applied::Rejected));
        assert!(controller.board().is_blank());

        // The same reply delivered twice only lands once.
        let Applied::EngineToMove(request) = controller.apply_move(0) else {
            panic!("engine should be asked to move");
        };
        assert!(!matches!(answer(&mut controller, &request), Applied::Rejected));
        assert!(matches!(answer(&mut controller, &request), Applied::Rejected));
        assert_eq!(controller.board().legal_moves().len(), 7);
    }

    #[test]
    fn earlier_reply_cannot_answer_a_later_request() {
        let mut controller = vs_engine(Difficulty::Hard);
        let Applied::EngineToMove(first) = controller.apply_move(4) else {
            panic!("engine should be asked to move");
        };
        answer(&mut controller, &first);
        let free = controller.legal_moves()[0];
        let Applied::EngineToMove(second) = controller.apply_move(free) else {
            panic!("engine should be asked to move");
        };
        assert_ne!(first.ticket, second.ticket);
        assert!(matches!(answer(&mut controller, &first), Applied::Rejected));
        assert!(controller.is_thinking());
    }

    #[test]
    fn reply_for_another_session_is_dropped() {
        let mut first = vs_engine(Difficulty::Hard);
        let Applied::EngineToMove(request) = first.apply_move(4) else {
            panic!("engine should be asked to move");
        };
        let mut second = vs_engine(Difficulty::Hard);
        assert!(matches!(second.apply_move(4), Applied::EngineToMove(_)));
        assert!(matches!(answer(&mut second, &request), Applied::Rejected));
    }

    #[test]
    fn hard_engine_never_loses_to_random_play() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..30 {
            let mut controller = vs_engine(Difficulty::Hard);
            while !controller.is_over() {
                let legal = controller.legal_moves();
                let cell = legal[rand::Rng::random_range(&mut rng, 0..legal.len())];
                if let Applied::EngineToMove(request) = controller.apply_move(cell) {
                    answer(&mut controller, &request);
                }
            }
            assert_ne!(controller.state(), TurnState::Finished(Outcome::Win(Mark::X)));
        }
    }

    #[test]
    fn no_move_reply_is_logged_and_ignored() {
        let mut controller = vs_engine(Difficulty::Hard);
        let Applied::EngineToMove(request) = controller.apply_move(4) else {
            panic!("engine should be asked to move");
        };
        let applied = controller.apply_engine_move(EngineReply {
            ticket: request.ticket,
            cell: None,
        });
        assert!(matches!(applied, Applied::Rejected));
        assert!(!controller.is_thinking());
    }
}
