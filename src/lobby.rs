use std::sync::mpsc::Receiver;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::record::{GameId, PlayerId};
use crate::store::{Listing, Query, RecordStore, StoreError};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GameSummary {
    pub id: GameId,
    pub name: String,
    pub host: String,
    /// The O seat is free, so joining plays rather than spectates.
    pub seat_open: bool,
    pub created_at: DateTime<Utc>,
}

/// Live list of public games the caller could join or watch.
///
/// Each item of the iterator is a complete, newest-first snapshot; the
/// iterator blocks for the next one and ends once stopped or disconnected.
pub struct Lobby {
    me: PlayerId,
    feed: Option<Receiver<Listing>>,
    games: Vec<GameSummary>,
}

impl Lobby {
    pub fn listen<S: RecordStore + ?Sized>(store: &S, me: PlayerId) -> Result<Self, StoreError> {
        let mut lobby = Self {
            me,
            feed: None,
            games: Vec::new(),
        };
        lobby.restart(store)?;
        Ok(lobby)
    }

    /// Replaces the feed with a fresh subscription.
    pub fn restart<S: RecordStore + ?Sized>(&mut self, store: &S) -> Result<(), StoreError> {
        self.stop();
        self.feed = Some(store.watch_query(Query::public())?);
        info!("player" = %self.me, "lobby_listening");
        self.refresh();
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.feed.take().is_some() {
            debug!("player" = %self.me, "lobby_stopped");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.feed.is_some()
    }

    /// Takes the newest snapshot that has arrived, if any. Returns whether the
    /// list changed.
    pub fn refresh(&mut self) -> bool {
        let Some(listing) = self.feed.as_ref().and_then(|feed| feed.try_iter().last()) else {
            return false;
        };
        let games = open_games(&self.me, listing);
        let changed = games != self.games;
        self.games = games;
        changed
    }

    pub fn games(&self) -> &[GameSummary] {
        &self.games
    }
}

impl Iterator for Lobby {
    type Item = Vec<GameSummary>;

    fn next(&mut self) -> Option<Self::Item> {
        let listing = self.feed.as_ref()?.recv().ok()?;
        self.games = open_games(&self.me, listing);
        Some(self.games.clone())
    }
}

fn open_games(me: &PlayerId, listing: Listing) -> Vec<GameSummary> {
    let mut games: Vec<GameSummary> = listing
        .into_iter()
        .filter(|(_, record)| !record.private && record.active && record.mark_of(me).is_none())
        .map(|(id, record)| GameSummary {
            id,
            seat_open: record.mark_o.is_none(),
            host: record.mark_x.name,
            name: record.name,
            created_at: record.created_at,
        })
        .collect();
    games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    games
}
