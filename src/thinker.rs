use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::time::Duration;

use tracing::{debug, info};

use crate::game::searcher::choose_move;
use crate::session::{EngineReply, EngineRequest};

/// Background thread that waits out the thinking delay and then runs the
/// engine. Dropping the `Thinker` closes the request channel and the thread
/// exits after its current request.
pub struct Thinker {
    req_tx: Sender<EngineRequest>,
    resp_rx: Receiver<EngineReply>,
}

impl Thinker {
    pub fn spawn() -> Self {
        let (req_tx, req_rx) = channel::<EngineRequest>();
        let (resp_tx, resp_rx) = channel::<EngineReply>();

        std::thread::spawn(move || {
            let mut rng = rand::rng();
            for request in req_rx {
                std::thread::sleep(request.delay);
                let cell = choose_move(&request.board, request.mark, request.difficulty, &mut rng);
                debug!("ticket" = ?request.ticket, "cell" = ?cell, "computer_move_ready");
                if resp_tx.send(EngineReply { ticket: request.ticket, cell }).is_err() {
                    break;
                }
            }
            info!("thinker_stopped");
        });

        Self { req_tx, resp_rx }
    }

    /// Queues a request. `false` when the worker is gone.
    pub fn request(&self, request: EngineRequest) -> bool {
        self.req_tx.send(request).is_ok()
    }

    pub fn try_reply(&self) -> Option<EngineReply> {
        match self.resp_rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn wait_reply(&self, timeout: Duration) -> Option<EngineReply> {
        self.resp_rx.recv_timeout(timeout).ok()
    }
}
