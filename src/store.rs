//! Storage contract for networked games and an in-process implementation.
//!
//! Records are versioned: every successful write bumps the version, and
//! writes and deletes name the version they were computed from. A stale
//! version is refused with [`StoreError::Conflict`], which is what makes the
//! read-then-write in move submission a real compare-and-set.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::mpsc::{Receiver, Sender, channel};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::chat::{ChatLog, ChatMessage};
use crate::record::{GameId, GameRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    NotFound(GameId),

    #[error("game {id} changed underneath: expected version {expected}, found {actual}")]
    Conflict {
        id: GameId,
        expected: u64,
        actual: u64,
    },

    #[error("game record could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// One notification on a record subscription.
#[derive(Clone, Debug)]
pub enum Change {
    Updated(Versioned<GameRecord>),
    Deleted,
}

/// Equality filter on the privacy flag; results come newest first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Query {
    pub private: bool,
}

impl Query {
    pub fn public() -> Self {
        Self { private: false }
    }
}

pub type Listing = Vec<(GameId, GameRecord)>;

pub trait RecordStore: Send + Sync {
    fn create(&self, record: &GameRecord) -> Result<GameId, StoreError>;

    fn read(&self, id: &GameId) -> Result<Versioned<GameRecord>, StoreError>;

    /// Replaces the record if it is still at `expected`; returns the new version.
    fn write(&self, id: &GameId, record: &GameRecord, expected: u64) -> Result<u64, StoreError>;

    fn delete(&self, id: &GameId, expected: u64) -> Result<(), StoreError>;

    /// Current state first, then every later change in write order. The
    /// channel disconnects when the subscription is lost.
    fn watch(&self, id: &GameId) -> Result<Receiver<Change>, StoreError>;

    /// A fresh listing now and after every change to any record.
    fn watch_query(&self, query: Query) -> Result<Receiver<Listing>, StoreError>;
}

struct Document {
    version: u64,
    body: serde_json::Value,
}

#[derive(Default)]
struct Chat {
    messages: Vec<ChatMessage>,
    watchers: Vec<Sender<ChatMessage>>,
}

/// Keeps records as JSON documents in memory. Shared between threads behind
/// an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<GameId, Document>,
    /// A dropped subscription's sender stays here until the next write or
    /// delete of its record, which drops it along with any emptied list.
    watchers: DashMap<GameId, Vec<Sender<Change>>>,
    queries: Mutex<Vec<(Query, Sender<Listing>)>>,
    chats: DashMap<GameId, Chat>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every subscription, as a lost connection would.
    pub fn disconnect_all(&self) {
        self.watchers.clear();
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for mut chat in self.chats.iter_mut() {
            chat.watchers.clear();
        }
        warn!("store_subscriptions_dropped");
    }

    fn notify(&self, id: &GameId, change: &Change) {
        if let Some(mut watchers) = self.watchers.get_mut(id) {
            watchers.retain(|tx| tx.send(change.clone()).is_ok());
        }
        self.watchers.remove_if(id, |_, watchers| watchers.is_empty());
    }

    /// The chat of a game that still exists. The record is checked while the
    /// chat entry is held, so a concurrent delete either sees the entry and
    /// removes it or has already removed the record.
    fn live_chat(&self, game: &GameId) -> Result<RefMut<'_, GameId, Chat>, StoreError> {
        let chat = self.chats.entry(game.clone()).or_default();
        if self.docs.contains_key(game) {
            return Ok(chat);
        }
        drop(chat);
        self.chats.remove(game);
        Err(StoreError::NotFound(game.clone()))
    }

    fn listing(&self, query: Query) -> Listing {
        let mut listing: Listing = self
            .docs
            .iter()
            .filter_map(|doc| match decode(&doc.body) {
                Ok(record) => Some((doc.key().clone(), record)),
                Err(err) => {
                    warn!("id" = %doc.key(), "error" = %err, "undecodable_record_skipped");
                    None
                }
            })
            .filter(|(_, record)| record.private == query.private)
            .collect();
        listing.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
        listing
    }

    fn publish_queries(&self) {
        let mut queries = self.queries.lock().unwrap_or_else(PoisonError::into_inner);
        queries.retain(|(query, tx)| tx.send(self.listing(*query)).is_ok());
    }
}

fn decode(body: &serde_json::Value) -> Result<GameRecord, StoreError> {
    Ok(GameRecord::deserialize(body)?)
}

impl RecordStore for MemoryStore {
    fn create(&self, record: &GameRecord) -> Result<GameId, StoreError> {
        let body = serde_json::to_value(record)?;
        let id = loop {
            let id = GameId::generate();
            if let Entry::Vacant(slot) = self.docs.entry(id.clone()) {
                slot.insert(Document { version: 1, body });
                break id;
            }
        };
        debug!("id" = %id, "record_created");
        self.publish_queries();
        Ok(id)
    }

    fn read(&self, id: &GameId) -> Result<Versioned<GameRecord>, StoreError> {
        let doc = self
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(Versioned {
            version: doc.version,
            value: decode(&doc.body)?,
        })
    }

    fn write(&self, id: &GameId, record: &GameRecord, expected: u64) -> Result<u64, StoreError> {
        let body = serde_json::to_value(record)?;
        let version = {
            let mut doc = self
                .docs
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if doc.version != expected {
                return Err(StoreError::Conflict {
                    id: id.clone(),
                    expected,
                    actual: doc.version,
                });
            }
            doc.version += 1;
            doc.body = body;
            // Still holding the document: watchers see writes in version order.
            self.notify(
                id,
                &Change::Updated(Versioned {
                    version: doc.version,
                    value: record.clone(),
                }),
            );
            doc.version
        };
        debug!("id" = %id, "version" = version, "record_written");
        self.publish_queries();
        Ok(version)
    }

    fn delete(&self, id: &GameId, expected: u64) -> Result<(), StoreError> {
        if self
            .docs
            .remove_if(id, |_, doc| doc.version == expected)
            .is_none()
        {
            return Err(match self.docs.get(id) {
                Some(doc) => StoreError::Conflict {
                    id: id.clone(),
                    expected,
                    actual: doc.version,
                },
                None => StoreError::NotFound(id.clone()),
            });
        }

        if let Some((_, watchers)) = self.watchers.remove(id) {
            for tx in watchers {
                let _ = tx.send(Change::Deleted);
            }
        }
        self.chats.remove(id);
        debug!("id" = %id, "record_deleted");
        self.publish_queries();
        Ok(())
    }

    fn watch(&self, id: &GameId) -> Result<Receiver<Change>, StoreError> {
        let doc = self
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let (tx, rx) = channel();
        let current = Versioned {
            version: doc.version,
            value: decode(&doc.body)?,
        };
        // The document guard is held until the watcher is registered, so no
        // write can slip in between the snapshot and the subscription.
        let _ = tx.send(Change::Updated(current));
        self.watchers.entry(id.clone()).or_default().push(tx);
        drop(doc);
        Ok(rx)
    }

    fn watch_query(&self, query: Query) -> Result<Receiver<Listing>, StoreError> {
        let (tx, rx) = channel();
        let mut queries = self.queries.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = tx.send(self.listing(query));
        queries.push((query, tx));
        Ok(rx)
    }
}

impl ChatLog for MemoryStore {
    fn append(&self, game: &GameId, mut message: ChatMessage) -> Result<(), StoreError> {
        let mut chat = self.live_chat(game)?;
        if let Some(last) = chat.messages.last() {
            message.sent_at = message.sent_at.max(last.sent_at);
        }
        chat.watchers.retain(|tx| tx.send(message.clone()).is_ok());
        chat.messages.push(message);
        Ok(())
    }

    fn watch_chat(&self, game: &GameId) -> Result<Receiver<ChatMessage>, StoreError> {
        let (tx, rx) = channel();
        let mut chat = self.live_chat(game)?;
        for message in &chat.messages {
            let _ = tx.send(message.clone());
        }
        chat.watchers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::game::Mark;
    use crate::record::{Identity, Seat};

    fn record(name: &str, private: bool) -> GameRecord {
        GameRecord::new(
            Seat {
                id: "host".into(),
                name: "Ann".into(),
            },
            name,
            private,
        )
    }

    #[test]
    fn stale_write_is_refused() {
        let store = MemoryStore::new();
        let id = store.create(&record("g", false)).unwrap();
        let first = store.read(&id).unwrap();

        let mut moved = first.value.clone();
        assert!(moved.board.place(0, Mark::X));
        let v2 = store.write(&id, &moved, first.version).unwrap();
        assert_eq!(v2, first.version + 1);

        let mut other = first.value.clone();
        assert!(other.board.place(8, Mark::X));
        let err = store.write(&id, &other, first.version).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { actual, .. } if actual == v2));
        assert_eq!(store.read(&id).unwrap().value, moved);
    }

    #[test]
    fn watchers_get_current_state_then_changes_in_order() {
        let store = MemoryStore::new();
        let id = store.create(&record("g", false)).unwrap();
        let rx = store.watch(&id).unwrap();

        let mut current = store.read(&id).unwrap();
        for cell in [0, 1, 2] {
            assert!(current.value.board.place(cell, Mark::X));
            store.write(&id, &current.value, current.version).unwrap();
            current = store.read(&id).unwrap();
        }
        let versions: Vec<u64> = rx
            .try_iter()
            .map(|change| match change {
                Change::Updated(v) => v.version,
                Change::Deleted => 0,
            })
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn delete_notifies_and_checks_version() {
        let store = MemoryStore::new();
        let id = store.create(&record("g", false)).unwrap();
        let rx = store.watch(&id).unwrap();
        assert!(matches!(store.delete(&id, 7), Err(StoreError::Conflict { .. })));
        store.delete(&id, 1).unwrap();
        assert!(matches!(rx.try_iter().last(), Some(Change::Deleted)));
        assert!(matches!(store.read(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(&id, 1), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn query_filters_privacy_and_orders_newest_first() {
        let store = MemoryStore::new();
        let mut old = record("old", false);
        old.created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut new = record("new", false);
        new.created_at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        store.create(&old).unwrap();
        store.create(&record("secret", true)).unwrap();

        let rx = store.watch_query(Query::public()).unwrap();
        store.create(&new).unwrap();

        let names: Vec<String> = rx
            .try_iter()
            .last()
            .unwrap()
            .into_iter()
            .map(|(_, record)| record.name)
            .collect();
        assert_eq!(names, vec!["new", "old"]);
    }

    #[test]
    fn chat_keeps_order_and_replays_backlog() {
        let store = MemoryStore::new();
        let id = store.create(&record("g", false)).unwrap();
        let ann = Identity::anonymous("Ann");
        store.append(&id, ChatMessage::new(&ann, "hi")).unwrap();
        let rx = store.watch_chat(&id).unwrap();
        store.append(&id, ChatMessage::new(&ann, "ready?")).unwrap();

        let got: Vec<ChatMessage> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].text, "hi");
        assert_eq!(got[1].text, "ready?");
        assert!(got[0].sent_at <= got[1].sent_at);

        let missing = GameId::from("nope");
        assert!(matches!(
            store.append(&missing, ChatMessage::new(&ann, "x")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn dropped_watchers_are_pruned_on_write() {
        let store = MemoryStore::new();
        let id = store.create(&record("g", false)).unwrap();
        let kept = store.watch(&id).unwrap();
        drop(store.watch(&id).unwrap());
        assert_eq!(store.watchers.get(&id).unwrap().len(), 2);

        let current = store.read(&id).unwrap();
        store.write(&id, &current.value, current.version).unwrap();
        assert_eq!(store.watchers.get(&id).unwrap().len(), 1);

        drop(kept);
        let current = store.read(&id).unwrap();
        store.write(&id, &current.value, current.version).unwrap();
        assert!(!store.watchers.contains_key(&id));
    }

    #[test]
    fn chat_racing_a_delete_leaves_nothing_behind() {
        let ann = Identity::anonymous("Ann");
        for _ in 0..50 {
            let store = Arc::new(MemoryStore::new());
            let id = store.create(&record("g", false)).unwrap();

            let writer = {
                let store = store.clone();
                let id = id.clone();
                let ann = ann.clone();
                thread::spawn(move || {
                    while store.append(&id, ChatMessage::new(&ann, "hi")).is_ok() {}
                })
            };
            thread::yield_now();
            store.delete(&id, 1).unwrap();
            writer.join().unwrap();

            assert!(!store.chats.contains_key(&id));
            assert!(matches!(store.watch_chat(&id), Err(StoreError::NotFound(_))));
            assert!(!store.chats.contains_key(&id));
        }
    }

    #[test]
    fn disconnect_closes_subscriptions() {
        let store = MemoryStore::new();
        let id = store.create(&record("g", false)).unwrap();
        let rx = store.watch(&id).unwrap();
        let _ = rx.recv().unwrap();
        store.disconnect_all();
        assert!(rx.recv().is_err());
    }
}
