//! Networked play with several participants sharing one store.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tris::game::Mark;
use tris::online::{Joined, MoveOutcome, OnlineGame, Rejection, Role, Update};
use tris::record::Identity;
use tris::store::{MemoryStore, RecordStore};

fn hosted() -> (Arc<MemoryStore>, OnlineGame<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let host = OnlineGame::create(store.clone(), Identity::anonymous("Ann"), "race", false).unwrap();
    (store, host)
}

#[test]
fn simultaneous_joiners_get_exactly_one_seat() {
    let (store, host) = hosted();
    let joiners = 8;
    let barrier = Arc::new(Barrier::new(joiners));

    let handles: Vec<_> = (0..joiners)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            let id = host.id().clone();
            thread::spawn(move || {
                let me = Identity::anonymous(format!("joiner-{i}"));
                barrier.wait();
                let (game, joined) = OnlineGame::join(store, me.clone(), id).unwrap();
                (me, game.role(), joined)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let seated: Vec<_> = results
        .iter()
        .filter(|(_, _, joined)| *joined == Joined::Seated(Mark::O))
        .collect();
    assert_eq!(seated.len(), 1);

    let record = store.read(host.id()).unwrap().value;
    assert_eq!(record.mark_o.as_ref().map(|s| &s.id), Some(&seated[0].0.id));

    for (me, role, joined) in &results {
        if me.id != seated[0].0.id {
            assert_eq!(*role, Role::Spectator);
            assert!(matches!(joined, Joined::Spectating | Joined::SeatTaken));
        }
    }
}

#[test]
fn joining_twice_returns_the_same_seat_without_writing() {
    let (store, host) = hosted();
    let bob = Identity::anonymous("Bob");
    let (_first, joined) = OnlineGame::join(store.clone(), bob.clone(), host.id().clone()).unwrap();
    assert_eq!(joined, Joined::Seated(Mark::O));
    let version = store.read(host.id()).unwrap().version;

    let (second, joined) = OnlineGame::join(store.clone(), bob, host.id().clone()).unwrap();
    assert_eq!(joined, Joined::Resumed(Mark::O));
    assert_eq!(second.role(), Role::Player(Mark::O));
    assert_eq!(store.read(host.id()).unwrap().version, version);

    let (again, joined) = OnlineGame::join(store.clone(), host.me().clone(), host.id().clone()).unwrap();
    assert_eq!(joined, Joined::Resumed(Mark::X));
    assert_eq!(again.role(), Role::Player(Mark::X));
}

#[test]
fn racing_submissions_from_one_seat_land_once() {
    for _ in 0..20 {
        let (store, host) = hosted();
        let (_guest, _) =
            OnlineGame::join(store.clone(), Identity::anonymous("Bob"), host.id().clone()).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        // The same player in two windows clicks two different cells at once.
        let handles: Vec<_> = [0u8, 8]
            .into_iter()
            .map(|cell| {
                let store = store.clone();
                let barrier = barrier.clone();
                let me = host.me().clone();
                let id = host.id().clone();
                thread::spawn(move || {
                    let (mut window, _) = OnlineGame::join(store, me, id).unwrap();
                    barrier.wait();
                    window.submit_move(cell).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<MoveOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let accepted = outcomes.iter().filter(|o| **o == MoveOutcome::Accepted).count();
        assert_eq!(accepted, 1, "{outcomes:?}");
        assert!(outcomes.iter().all(|o| matches!(
            o,
            MoveOutcome::Accepted
                | MoveOutcome::Rejected(Rejection::Stale | Rejection::NotYourTurn)
        )));

        let record = store.read(host.id()).unwrap().value;
        assert_eq!(record.board.legal_moves().len(), 8);
        assert_eq!(record.active_mark, Mark::O);
    }
}

#[test]
fn spectators_follow_every_move() {
    let (store, mut host) = hosted();
    let (mut guest, _) =
        OnlineGame::join(store.clone(), Identity::anonymous("Bob"), host.id().clone()).unwrap();
    let (mut watcher, joined) =
        OnlineGame::join(store.clone(), Identity::anonymous("Cy"), host.id().clone()).unwrap();
    assert_eq!(joined, Joined::Spectating);

    let mover = thread::spawn(move || {
        for (x, o) in [(4, 0), (2, 6), (3, 5), (7, 1)] {
            assert_eq!(host.submit_move(x).unwrap(), MoveOutcome::Accepted);
            assert_eq!(guest.submit_move(o).unwrap(), MoveOutcome::Accepted);
        }
        assert_eq!(host.submit_move(8).unwrap(), MoveOutcome::Accepted);
    });
    mover.join().unwrap();

    while watcher.wait(Duration::from_millis(50)).is_some() {}
    let view = watcher.view().unwrap();
    assert!(view.board.is_full());
    assert_eq!(view.status, "It's a draw!");
    assert_eq!(view.score.draws, 1);
    assert!(view.interactive.iter().all(|&c| !c));
    assert_eq!(watcher.poll(), None);
}

#[test]
fn leaving_mid_move_keeps_the_record_consistent() {
    let (store, mut host) = hosted();
    let (guest, _) =
        OnlineGame::join(store.clone(), Identity::anonymous("Bob"), host.id().clone()).unwrap();
    let id = host.id().clone();

    let leaver = thread::spawn(move || guest.leave().unwrap());
    let outcome = host.submit_move(4).unwrap();
    leaver.join().unwrap();

    let record = store.read(&id).unwrap().value;
    assert!(record.mark_o.is_none());
    assert!(record.is_paused());
    assert!(record.board.is_blank());
    assert!(matches!(
        outcome,
        MoveOutcome::Accepted | MoveOutcome::Rejected(Rejection::Stale | Rejection::Inactive)
    ));

    assert!(matches!(host.wait(Duration::from_secs(1)), Some(Update::Changed)));
    assert_eq!(host.role(), Role::Player(Mark::X));
}
