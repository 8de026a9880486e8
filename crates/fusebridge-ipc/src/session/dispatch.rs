//! Caller-facing dispatch: synchronous calls, asynchronous calls and
//! notifications.

use std::sync::atomic::Ordering;
use std::time::Instant;

use nix::errno::Errno;
use tracing::{debug, trace, warn};

use super::pool::{Acquired, Purpose};
use super::{SESSION_TARGET, Session, lock};
use crate::error::{DispatchError, ProtocolError};
use crate::interrupt::Interrupt;
use crate::opcode::Opcode;
use crate::shape::ReplyShape;
use crate::ticket::{Completion, Handler, Reply, TicketFlags, TicketKey};
use crate::wire::{Credentials, encode_request};

/// Identity and cancellation attached to a single call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    credentials: Credentials,
    interrupt: Option<Interrupt>,
}

impl CallContext {
    /// Creates a context for the given caller identity.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            interrupt: None,
        }
    }

    /// Creates a context carrying the identity of the current process.
    #[must_use]
    pub fn current_process() -> Self {
        Self::new(Credentials {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            pid: std::process::id(),
        })
    }

    /// Attaches a cancellation token to the call.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Caller identity written into the request header.
    #[must_use]
    pub const fn credentials(&self) -> Credentials {
        self.credentials
    }

    /// Cancellation token guarding the call, if any.
    #[must_use]
    pub const fn interrupt(&self) -> Option<&Interrupt> {
        self.interrupt.as_ref()
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(Interrupt::is_interrupted)
    }
}

impl Session {
    /// Sends a request and blocks until its reply, a teardown, an
    /// interruption or the per-call timeout.
    ///
    /// A successful reply has already been checked against the size the
    /// opcode requires.
    ///
    /// The call first blocks until the handshake has completed, even when no
    /// handshake has been started yet; nothing here starts one. If the outcome
    /// is still unknown after the init timeout the call returns
    /// [`DispatchError::TimedOut`] and the session is killed. Firing the
    /// context's token during this wait also kills the session.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Disconnected`] when the session is or becomes
    /// killed, [`DispatchError::Interrupted`] when the context's token fires
    /// first, [`DispatchError::TimedOut`] when the daemon timeout elapses (the
    /// session is killed as well), [`DispatchError::Unsupported`] and
    /// [`DispatchError::Daemon`] for error replies, and
    /// [`DispatchError::ProtocolViolation`] for a malformed reply body.
    ///
    /// # Panics
    ///
    /// Panics when `opcode` is [`Opcode::Forget`], which is never answered;
    /// send it with [`Session::notify`].
    pub fn dispatch_sync(
        &self,
        opcode: Opcode,
        nodeid: u64,
        payload: &[u8],
        context: &CallContext,
    ) -> Result<Reply, DispatchError> {
        assert_answerable(opcode);
        if context.is_interrupted() {
            return Err(DispatchError::Interrupted);
        }
        let acquired = self.make(opcode, nodeid, payload, context, Purpose::Request)?;
        self.submit(&acquired, Handler::DefaultWait)?;
        self.wait_answer(&acquired, context)
    }

    /// Sends a request and returns immediately; `on_complete` runs on the
    /// thread that delivers the outcome.
    ///
    /// The callback receives the same results [`Session::dispatch_sync`]
    /// would return, including [`DispatchError::Disconnected`] on teardown.
    /// When this method itself returns an error the callback is dropped
    /// without being called.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Disconnected`] for a killed session and
    /// [`DispatchError::Unsupported`] for an opcode the daemon refused before.
    ///
    /// # Panics
    ///
    /// Panics when `opcode` is [`Opcode::Forget`].
    pub fn dispatch_async<F>(
        &self,
        opcode: Opcode,
        nodeid: u64,
        payload: &[u8],
        context: &CallContext,
        on_complete: F,
    ) -> Result<(), DispatchError>
    where
        F: FnOnce(Result<Reply, DispatchError>) + Send + 'static,
    {
        assert_answerable(opcode);
        let acquired = self.make(opcode, nodeid, payload, context, Purpose::Request)?;
        self.submit(&acquired, Handler::Custom(Box::new(on_complete)))
    }

    /// Sends a request whose reply is consumed and discarded.
    ///
    /// # Errors
    ///
    /// Same as [`Session::dispatch_async`].
    ///
    /// # Panics
    ///
    /// Panics when `opcode` is [`Opcode::Forget`].
    pub fn dispatch_detached(
        &self,
        opcode: Opcode,
        nodeid: u64,
        payload: &[u8],
        context: &CallContext,
    ) -> Result<(), DispatchError> {
        assert_answerable(opcode);
        let acquired = self.make(opcode, nodeid, payload, context, Purpose::Request)?;
        self.submit(&acquired, Handler::FireAndForget)
    }

    /// Sends a request the daemon never answers, such as `FORGET`.
    ///
    /// The ticket is not registered for a reply; the pump releases it as soon
    /// as it has been pulled.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Disconnected`] for a killed session.
    pub fn notify(
        &self,
        opcode: Opcode,
        nodeid: u64,
        payload: &[u8],
        context: &CallContext,
    ) -> Result<(), DispatchError> {
        let acquired = self.make(opcode, nodeid, payload, context, Purpose::Request)?;
        {
            let mut state = acquired.cell.lock();
            state.flags.insert(TicketFlags::INVALIDATED);
            state.handler = Handler::FireAndForget;
        }
        if !self.enqueue(&acquired) {
            self.release(acquired.key);
            return Err(DispatchError::Disconnected);
        }
        Ok(())
    }

    /// Acquires a ticket and serialises the request into it.
    pub(super) fn make(
        &self,
        opcode: Opcode,
        nodeid: u64,
        payload: &[u8],
        context: &CallContext,
        purpose: Purpose,
    ) -> Result<Acquired, DispatchError> {
        if self.not_implemented.load(Ordering::SeqCst) & opcode.mask() != 0 {
            debug!(target: SESSION_TARGET, %opcode, "opcode known to be unimplemented");
            return Err(DispatchError::Unsupported { opcode });
        }

        let acquired = self.acquire(purpose, context.interrupt())?;
        let frame = match encode_request(
            opcode,
            acquired.key.unique,
            nodeid,
            context.credentials(),
            payload,
        ) {
            Ok(frame) => frame,
            Err(error) => {
                self.release(acquired.key);
                return Err(error.into());
            }
        };
        let shape = ReplyShape::for_request(opcode, payload, self.protocol());

        let mut state = acquired.cell.lock();
        state.request = frame;
        state.opcode = Some(opcode);
        state.shape = Some(shape);
        drop(state);

        trace!(
            target: SESSION_TARGET,
            %opcode,
            nodeid,
            unique = acquired.key.unique,
            payload_len = payload.len(),
            "request built"
        );
        Ok(acquired)
    }

    /// Installs the handler, registers for the reply and queues the request.
    pub(super) fn submit(&self, acquired: &Acquired, handler: Handler) -> Result<(), DispatchError> {
        acquired.cell.lock().handler = handler;
        if let Err(error) = self.register(acquired.key) {
            self.release(acquired.key);
            return Err(error);
        }
        // A killed session fails the registered ticket through teardown, so
        // an unqueued request still completes.
        let _queued = self.enqueue(acquired);
        Ok(())
    }

    /// Appends the ticket to the outgoing queue and wakes the pump.
    ///
    /// Returns `false` when the session is killed and the request was not
    /// queued.
    ///
    /// # Panics
    ///
    /// Panics when the ticket was already queued since its last refresh.
    pub(super) fn enqueue(&self, acquired: &Acquired) -> bool {
        {
            let mut state = acquired.cell.lock();
            assert!(
                !state.flags.contains(TicketFlags::DIRTY),
                "ticket {} queued twice without a refresh",
                state.unique
            );
            state.flags.insert(TicketFlags::DIRTY);
        }

        let mut queue = lock(&self.outgoing);
        if self.is_killed() {
            debug!(
                target: SESSION_TARGET,
                unique = acquired.key.unique,
                "session killed; request not queued"
            );
            return false;
        }
        queue.push_back(acquired.key);
        self.outgoing_ready.notify_one();
        true
    }

    /// Blocks on the ticket until it is answered or the wait is abandoned.
    fn wait_answer(
        &self,
        acquired: &Acquired,
        context: &CallContext,
    ) -> Result<Reply, DispatchError> {
        let key = acquired.key;
        if let Some(interrupt) = context.interrupt() {
            interrupt.attach(&acquired.cell);
        }
        let deadline = self.limits.daemon_timeout.map(|timeout| Instant::now() + timeout);

        let mut state = acquired.cell.lock();
        let abandoned = loop {
            if state.flags.contains(TicketFlags::ANSWERED) {
                break None;
            }
            if context.is_interrupted() {
                break Some(DispatchError::Interrupted);
            }
            match deadline {
                None => state = acquired.cell.wait(state),
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        break Some(DispatchError::TimedOut);
                    };
                    state = acquired.cell.wait_timeout(state, remaining).0;
                }
            }
        };
        if let Some(interrupt) = context.interrupt() {
            interrupt.detach();
        }

        if let Some(reason) = abandoned {
            // Answer locally; whoever still holds a reference releases.
            state.flags.insert(TicketFlags::ANSWERED);
            drop(state);
            if self.withdraw(key) {
                self.release(key);
            }
            debug!(
                target: SESSION_TARGET,
                unique = key.unique,
                %reason,
                "caller stopped waiting"
            );
            if reason == DispatchError::TimedOut {
                warn!(
                    target: SESSION_TARGET,
                    unique = key.unique,
                    timeout = ?self.limits.daemon_timeout,
                    "daemon timed out; killing session"
                );
                self.mark_killed();
            }
            return Err(reason);
        }

        let outcome = state.outcome.take();
        let opcode = state.opcode;
        let shape = state.shape;
        drop(state);
        self.release(key);

        match (outcome, opcode, shape) {
            (Some(completion), Some(opcode), Some(shape)) => {
                self.interpret(opcode, shape, key, completion)
            }
            _ => Err(DispatchError::Disconnected),
        }
    }

    /// Turns a raw completion into the caller-visible result.
    pub(super) fn interpret(
        &self,
        opcode: Opcode,
        shape: ReplyShape,
        key: TicketKey,
        completion: Completion,
    ) -> Result<Reply, DispatchError> {
        match completion {
            Completion::Failed(error) => Err(error),
            Completion::Answered { errno: 0, body } => {
                if shape.accepts(body.len()) {
                    Ok(Reply::new(opcode, key.unique, body))
                } else {
                    warn!(
                        target: SESSION_TARGET,
                        %opcode,
                        unique = key.unique,
                        %shape,
                        body_len = body.len(),
                        "reply body has the wrong size"
                    );
                    Err(ProtocolError::ShapeMismatch {
                        opcode,
                        expected: shape,
                        actual: body.len(),
                    }
                    .into())
                }
            }
            Completion::Answered { errno, .. } if errno == Errno::ENOSYS as i32 => {
                self.not_implemented
                    .fetch_or(opcode.mask(), Ordering::SeqCst);
                debug!(target: SESSION_TARGET, %opcode, "daemon does not implement opcode");
                Err(DispatchError::Unsupported { opcode })
            }
            Completion::Answered { errno, .. } => Err(DispatchError::Daemon { errno }),
        }
    }
}

fn assert_answerable(opcode: Opcode) {
    assert!(
        opcode != Opcode::Forget,
        "{opcode} is never answered; send it with notify"
    );
}
