//! The shared document behind a networked game, and the identities that
//! appear in it.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::game::{Board, Mark, Outcome, Score};

const ID_LEN: usize = 20;

fn random_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self(id.trim().to_owned())
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Opaque caller identifier handed out by the identity provider.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Identity {
    pub id: PlayerId,
    pub name: String,
}

impl Identity {
    /// A fresh anonymous identity.
    pub fn anonymous(name: impl Into<String>) -> Self {
        Self {
            id: PlayerId(random_id()),
            name: name.into(),
        }
    }

    pub fn seat(&self) -> Seat {
        Seat {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Seat {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize)]
pub struct RematchFlags {
    pub x: bool,
    pub o: bool,
}

impl RematchFlags {
    pub fn set(&mut self, mark: Mark) {
        match mark {
            Mark::X => self.x = true,
            Mark::O => self.o = true,
        }
    }

    pub fn both(&self) -> bool {
        self.x && self.o
    }

    fn requested_by(&self) -> Option<Mark> {
        match (self.x, self.o) {
            (true, false) => Some(Mark::X),
            (false, true) => Some(Mark::O),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GameRecord {
    pub board: Board,
    pub active_mark: Mark,
    pub active: bool,
    pub mark_x: Seat,
    pub mark_o: Option<Seat>,
    pub private: bool,
    pub name: String,
    pub score: Score,
    pub winning_line: Option<[u8; 3]>,
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    pub rematch: RematchFlags,
}

impl GameRecord {
    pub fn new(host: Seat, name: impl Into<String>, private: bool) -> Self {
        Self {
            board: Board::default(),
            active_mark: Mark::X,
            active: true,
            mark_x: host,
            mark_o: None,
            private,
            name: name.into(),
            score: Score::default(),
            winning_line: None,
            outcome: None,
            created_at: Utc::now(),
            rematch: RematchFlags::default(),
        }
    }

    pub fn seat(&self, mark: Mark) -> Option<&Seat> {
        match mark {
            Mark::X => Some(&self.mark_x),
            Mark::O => self.mark_o.as_ref(),
        }
    }

    pub fn mark_of(&self, id: &PlayerId) -> Option<Mark> {
        if self.mark_x.id == *id {
            Some(Mark::X)
        } else if self.mark_o.as_ref().is_some_and(|seat| seat.id == *id) {
            Some(Mark::O)
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        !self.active && self.outcome.is_none()
    }

    /// Empties the board for a new round. Score and seats are untouched.
    pub fn clear_round(&mut self) {
        self.board = Board::default();
        self.active_mark = Mark::X;
        self.winning_line = None;
        self.outcome = None;
        self.rematch = RematchFlags::default();
    }

    pub fn status(&self) -> String {
        let name = |mark: Mark| {
            self.seat(mark)
                .map_or_else(|| format!("Player {mark}"), |seat| seat.name.clone())
        };

        match self.outcome {
            Some(outcome) => {
                let result = match outcome {
                    Outcome::Win(mark) => format!("{} ({mark}) wins!", name(mark)),
                    Outcome::Draw => "It's a draw!".to_owned(),
                };
                match self.rematch.requested_by() {
                    Some(mark) => format!("{result} Rematch requested by {mark}."),
                    None => result,
                }
            }
            None if self.is_paused() => "Waiting for an opponent...".to_owned(),
            None => format!("{}'s turn ({})", name(self.active_mark), self.active_mark),
        }
    }
}
