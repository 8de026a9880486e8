//! Threaded stand-in for a filesystem daemon.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::session::{Pulled, Session};
use crate::tests::support::frames::PulledRequest;
use crate::Opcode;
use crate::wire::{encode_reply, init_reply};

use super::test_protocol;

/// How the stub daemon reacts to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Answer {
    /// Reply with a body and no error.
    Body(Vec<u8>),
    /// Reply with an errno and no body.
    Errno(i32),
    /// Keep the request without answering it.
    Hold,
}

type Responder = Box<dyn FnMut(&PulledRequest) -> Answer + Send>;

/// Pulls requests on its own thread and answers them with a responder.
///
/// `INIT` is always answered with the test protocol. Held requests are kept
/// in arrival order and can be answered later with [`StubDaemon::release`].
pub(crate) struct StubDaemon {
    session: Arc<Session>,
    held: Arc<Mutex<Vec<PulledRequest>>>,
    thread: Option<JoinHandle<usize>>,
}

impl StubDaemon {
    pub(crate) fn spawn<F>(session: Arc<Session>, responder: F) -> Self
    where
        F: FnMut(&PulledRequest) -> Answer + Send + 'static,
    {
        let held = Arc::new(Mutex::new(Vec::new()));
        let mut respond_to: Responder = Box::new(responder);
        let thread = {
            let session = Arc::clone(&session);
            let held = Arc::clone(&held);
            thread::Builder::new()
                .name("stub-daemon".to_owned())
                .spawn(move || {
                    let mut pulled = 0;
                    while let Pulled::Request(frame) = session.pull() {
                        pulled += 1;
                        let request = PulledRequest::from_frame(&frame);
                        if request.opcode() == Opcode::Forget {
                            continue;
                        }
                        let reply = if request.opcode() == Opcode::Init {
                            Answer::Body(init_reply(test_protocol()).to_vec())
                        } else {
                            respond_to(&request)
                        };
                        respond(&session, &held, request, reply);
                    }
                    pulled
                })
                .expect("stub daemon thread should spawn")
        };
        Self {
            session,
            held,
            thread: Some(thread),
        }
    }

    /// Number of requests currently held back.
    pub(crate) fn held(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Correlation ids of the held requests in arrival order.
    pub(crate) fn held_uniques(&self) -> Vec<u64> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(PulledRequest::unique)
            .collect()
    }

    /// Answers held requests in reverse arrival order with `answer_for`.
    pub(crate) fn release_reversed<F>(&self, mut answer_for: F)
    where
        F: FnMut(&PulledRequest) -> Vec<u8>,
    {
        let held: Vec<PulledRequest> = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for request in held.iter().rev() {
            let frame = encode_reply(
                request.unique(),
                0,
                &answer_for(request),
                self.session.convention(),
            )
            .expect("reply encodes");
            self.session.push(&frame).expect("reply accepted");
        }
    }

    /// Stops the daemon by killing the session; returns how many requests it
    /// pulled.
    pub(crate) fn stop(mut self) -> usize {
        self.session.mark_killed();
        self.thread
            .take()
            .map(|thread| thread.join().expect("stub daemon should not panic"))
            .unwrap_or_default()
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.session.mark_killed();
        if let Some(thread) = self.thread.take() {
            drop(thread.join());
        }
    }
}

fn respond(
    session: &Session,
    held: &Mutex<Vec<PulledRequest>>,
    request: PulledRequest,
    reply: Answer,
) {
    let encoded = match reply {
        Answer::Body(body) => encode_reply(request.unique(), 0, &body, session.convention()),
        Answer::Errno(errno) => encode_reply(request.unique(), errno, &[], session.convention()),
        Answer::Hold => {
            held.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);
            return;
        }
    };
    let frame = encoded.expect("reply encodes");
    session.push(&frame).expect("reply accepted");
}
