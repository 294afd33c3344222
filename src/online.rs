//! Networked play over a shared [`GameRecord`].
//!
//! Every participant runs its own [`OnlineGame`] against the same store.
//! There is no server-side lock; each mutation is a read of the current
//! record followed by a write conditioned on the version that was read. A
//! move that loses that race is dropped and the next snapshot shows what
//! actually happened.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chat::{ChatLog, ChatMessage};
use crate::game::Mark;
use crate::record::{GameId, GameRecord, Identity};
use crate::store::{Change, RecordStore, StoreError, Versioned};
use crate::view::{View, clickable};

/// How many times a join, rematch or leave re-reads after a version conflict.
const MAX_ATTEMPTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("the game has ended")]
    GameEnded,

    #[error("gave up after {0} conflicting writes")]
    Contention(usize),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => SyncError::GameEnded,
            err => SyncError::Store(err),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Player(Mark),
    Spectator,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Joined {
    /// The caller already held this seat.
    Resumed(Mark),
    Seated(Mark),
    Spectating,
    /// Another joiner took the free seat first.
    SeatTaken,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MoveOutcome {
    Accepted,
    Rejected(Rejection),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rejection {
    NotAPlayer,
    Inactive,
    NotYourTurn,
    Occupied,
    /// Someone else wrote the record between our read and our write.
    Stale,
}

/// What [`OnlineGame::poll`] saw on the subscription.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Update {
    Changed,
    /// The record is gone; go back to the lobby.
    GameEnded,
    /// The subscription was lost; rejoining with the same id recovers.
    Disconnected,
}

pub struct OnlineGame<S> {
    store: Arc<S>,
    me: Identity,
    id: GameId,
    role: Role,
    changes: Receiver<Change>,
    chat: Receiver<ChatMessage>,
    record: Option<Versioned<GameRecord>>,
    messages: Vec<ChatMessage>,
    closed: bool,
}

impl<S: RecordStore + ChatLog> OnlineGame<S> {
    /// Creates a record with the caller in the X seat.
    pub fn create(
        store: Arc<S>,
        me: Identity,
        name: &str,
        private: bool,
    ) -> Result<Self, SyncError> {
        let record = GameRecord::new(me.seat(), name, private);
        let id = store.create(&record)?;
        info!("id" = %id, "player" = %me.id, "private" = private, "online_game_created");
        Self::attach(store, me, id, Role::Player(Mark::X))
    }

    /// Takes the O seat if it is free, resumes a seat the caller already
    /// holds, and otherwise spectates.
    pub fn join(store: Arc<S>, me: Identity, id: GameId) -> Result<(Self, Joined), SyncError> {
        let mut lost_race = false;
        for _ in 0..MAX_ATTEMPTS {
            let current = store.read(&id)?;
            let record = &current.value;

            if let Some(mark) = record.mark_of(&me.id) {
                info!("id" = %id, "mark" = %mark, "online_game_resumed");
                let game = Self::attach(store, me, id, Role::Player(mark))?;
                return Ok((game, Joined::Resumed(mark)));
            }

            if record.mark_o.is_some() {
                let joined = if lost_race {
                    Joined::SeatTaken
                } else {
                    Joined::Spectating
                };
                info!("id" = %id, "joined" = ?joined, "online_game_spectating");
                let game = Self::attach(store, me, id, Role::Spectator)?;
                return Ok((game, joined));
            }

            let mut next = record.clone();
            next.mark_o = Some(me.seat());
            if next.is_paused() {
                next.active = true;
            }
            match store.write(&id, &next, current.version) {
                Ok(_) => {
                    info!("id" = %id, "player" = %me.id, "online_game_joined");
                    let game = Self::attach(store, me, id, Role::Player(Mark::O))?;
                    return Ok((game, Joined::Seated(Mark::O)));
                }
                Err(StoreError::Conflict { .. }) => {
                    info!("id" = %id, "join_conflict");
                    lost_race = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SyncError::Contention(MAX_ATTEMPTS))
    }

    fn attach(store: Arc<S>, me: Identity, id: GameId, role: Role) -> Result<Self, SyncError> {
        let changes = store.watch(&id)?;
        let chat = store.watch_chat(&id)?;
        let mut game = Self {
            store,
            me,
            id,
            role,
            changes,
            chat,
            record: None,
            messages: Vec::new(),
            closed: false,
        };
        if game.poll() == Some(Update::GameEnded) {
            return Err(SyncError::GameEnded);
        }
        Ok(game)
    }

    pub fn id(&self) -> &GameId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn me(&self) -> &Identity {
        &self.me
    }

    /// Last record seen on the subscription.
    pub fn record(&self) -> Option<&GameRecord> {
        self.record.as_ref().map(|v| &v.value)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Plays `cell` for the caller. The record is re-read right before the
    /// write and the write only lands if nobody wrote in between.
    pub fn submit_move(&mut self, cell: u8) -> Result<MoveOutcome, SyncError> {
        let rejected = |why: Rejection| -> Result<MoveOutcome, SyncError> {
            debug!("cell" = cell, "why" = ?why, "online_move_rejected");
            Ok(MoveOutcome::Rejected(why))
        };

        if self.role == Role::Spectator {
            return rejected(Rejection::NotAPlayer);
        }

        let current = self.store.read(&self.id)?;
        let record = &current.value;
        let Some(mark) = record.mark_of(&self.me.id) else {
            return rejected(Rejection::NotAPlayer);
        };
        if !record.active {
            return rejected(Rejection::Inactive);
        }
        if record.active_mark != mark {
            return rejected(Rejection::NotYourTurn);
        }

        let mut next = record.clone();
        if !next.board.place(cell, mark) {
            return rejected(Rejection::Occupied);
        }
        match next.board.outcome_after(mark) {
            Some(outcome) => {
                next.active = false;
                next.outcome = Some(outcome);
                next.score.record(outcome);
                next.winning_line = next.board.winning_line(mark);
            }
            None => next.active_mark = !mark,
        }

        match self.store.write(&self.id, &next, current.version) {
            Ok(version) => {
                info!("id" = %self.id, "cell" = cell, "mark" = %mark, "version" = version, "online_move_done");
                Ok(MoveOutcome::Accepted)
            }
            Err(StoreError::Conflict { .. }) => rejected(Rejection::Stale),
            Err(err) => Err(err.into()),
        }
    }

    /// Raises the caller's rematch flag. When both flags are up the board is
    /// cleared and play resumes with the tally kept. Returns whether the
    /// request was recorded.
    pub fn request_rematch(&mut self) -> Result<bool, SyncError> {
        self.retry(|me, record| {
            let Some(mark) = record.mark_of(&me.id) else {
                return None;
            };
            if record.outcome.is_none() || record.mark_o.is_none() {
                return None;
            }
            let mut next = record.clone();
            next.rematch.set(mark);
            if next.rematch.both() {
                next.clear_round();
                next.active = true;
            }
            Some(next)
        })
    }

    pub fn send_chat(&self, text: &str) -> Result<(), SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.store.append(&self.id, ChatMessage::new(&self.me, text))?;
        Ok(())
    }

    /// Gives up the caller's seat and drops the subscription.
    ///
    /// X leaving an empty table deletes the record. X leaving with O seated
    /// moves O to X. Either way the remaining record pauses until a new O
    /// joins, with a fresh board and tally. Spectators leave without writing.
    pub fn leave(self) -> Result<(), SyncError> {
        for _ in 0..MAX_ATTEMPTS {
            let current = match self.store.read(&self.id) {
                Ok(current) => current,
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let record = &current.value;

            let result = match record.mark_of(&self.me.id) {
                None => {
                    info!("id" = %self.id, "spectator_left");
                    return Ok(());
                }
                Some(Mark::X) if record.mark_o.is_none() => {
                    self.store.delete(&self.id, current.version)
                }
                Some(mark) => {
                    let mut next = record.clone();
                    if mark == Mark::X {
                        if let Some(seat) = next.mark_o.take() {
                            next.mark_x = seat;
                            // The promoted player keeps their wins under the new mark.
                            next.score = next.score.swapped();
                        }
                    } else {
                        next.mark_o = None;
                    }
                    next.clear_round();
                    next.active = false;
                    self.store.write(&self.id, &next, current.version).map(drop)
                }
            };

            match result {
                Ok(()) => {
                    info!("id" = %self.id, "player" = %self.me.id, "online_game_left");
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => debug!("id" = %self.id, "leave_conflict"),
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
        Err(SyncError::Contention(MAX_ATTEMPTS))
    }

    /// Applies everything that arrived on the subscription without blocking.
    /// Reports the end of the game or the loss of the subscription once.
    pub fn poll(&mut self) -> Option<Update> {
        if self.closed {
            return None;
        }
        self.drain_chat();

        let mut changed = false;
        loop {
            match self.changes.try_recv() {
                Ok(change) => {
                    if let Some(update) = self.apply(change) {
                        return Some(update);
                    }
                    changed = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Some(self.close(Update::Disconnected)),
            }
        }
        changed.then_some(Update::Changed)
    }

    /// Blocks up to `timeout` for the next change, then drains the rest.
    pub fn wait(&mut self, timeout: Duration) -> Option<Update> {
        if self.closed {
            return None;
        }
        match self.changes.recv_timeout(timeout) {
            Ok(change) => match self.apply(change) {
                Some(update) => Some(update),
                None => self.poll().or(Some(Update::Changed)),
            },
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.close(Update::Disconnected)),
        }
    }

    pub fn view(&self) -> Option<View> {
        let record = self.record()?;
        let my_turn = match self.role {
            Role::Player(mark) => record.active && record.active_mark == mark,
            Role::Spectator => false,
        };
        Some(View {
            board: record.board,
            status: record.status(),
            score: record.score,
            highlight: record.winning_line,
            interactive: clickable(&record.board, my_turn),
            outcome: record.outcome,
        })
    }

    fn apply(&mut self, change: Change) -> Option<Update> {
        match change {
            Change::Updated(versioned) => {
                let newer = self
                    .record
                    .as_ref()
                    .is_none_or(|seen| versioned.version > seen.version);
                if newer {
                    let role = versioned
                        .value
                        .mark_of(&self.me.id)
                        .map_or(Role::Spectator, Role::Player);
                    if role != self.role {
                        info!("id" = %self.id, "from" = ?self.role, "to" = ?role, "role_changed");
                        self.role = role;
                    }
                    self.record = Some(versioned);
                }
                None
            }
            Change::Deleted => Some(self.close(Update::GameEnded)),
        }
    }

    fn close(&mut self, update: Update) -> Update {
        warn!("id" = %self.id, "update" = ?update, "online_game_closed");
        self.closed = true;
        update
    }

    fn drain_chat(&mut self) {
        self.messages.extend(self.chat.try_iter());
    }

    fn retry(
        &self,
        change: impl Fn(&Identity, &GameRecord) -> Option<GameRecord>,
    ) -> Result<bool, SyncError> {
        for _ in 0..MAX_ATTEMPTS {
            let current = self.store.read(&self.id)?;
            let Some(next) = change(&self.me, &current.value) else {
                return Ok(false);
            };
            match self.store.write(&self.id, &next, current.version) {
                Ok(_) => return Ok(true),
                Err(StoreError::Conflict { .. }) => debug!("id" = %self.id, "write_conflict"),
                Err(err) => return Err(err.into()),
            }
        }
        Err(SyncError::Contention(MAX_ATTEMPTS))
    }
}
