//! Byte-stream pump connecting a session to a daemon.
//!
//! [`ChannelPump`] runs two named threads. The writer pulls requests from the
//! session and writes them to the daemon; the reader reads reply frames and
//! pushes them into the session. A malformed reply is logged and skipped. A
//! broken or closed stream kills the session, which in turn stops the
//! writer. The reader only returns once the daemon side of the stream closes,
//! so callers stop the daemon before joining.

mod framing;

#[cfg(test)]
mod tests;

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::{Pulled, Session};
use crate::wire::REPLY_HEADER_LEN;

pub use framing::{FrameReader, FrameWriter};

/// Log target for channel operations.
const CHANNEL_TARGET: &str = "fusebridge_ipc::channel";

const WRITER_THREAD: &str = "fusebridge-writer";
const READER_THREAD: &str = "fusebridge-reader";

/// Largest reply frame the reader accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors raised while moving frames between a session and a stream.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The stream failed.
    #[error("daemon channel I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A frame declared fewer bytes than its header needs.
    #[error("frame of {len} bytes is shorter than the {min}-byte minimum")]
    FrameTooShort {
        /// Declared frame length.
        len: u32,
        /// Smallest acceptable length.
        min: usize,
    },
    /// A frame declared more bytes than the reader accepts.
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge {
        /// Declared frame length.
        len: u32,
        /// Largest acceptable length.
        max: usize,
    },
    /// A pump thread panicked.
    #[error("{thread} thread panicked")]
    Panicked {
        /// Name of the thread.
        thread: &'static str,
    },
}

/// Reader and writer threads serving one session.
#[derive(Debug)]
pub struct ChannelPump {
    session: Arc<Session>,
    reader: JoinHandle<Result<(), ChannelError>>,
    writer: JoinHandle<Result<(), ChannelError>>,
}

impl ChannelPump {
    /// Starts pumping between `session` and a daemon stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] when a thread cannot be spawned; the
    /// session is killed in that case.
    pub fn spawn<R, W>(session: Arc<Session>, reader: R, writer: W) -> Result<Self, ChannelError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let writer_thread = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name(WRITER_THREAD.to_owned())
                .spawn(move || write_requests(&session, FrameWriter::new(writer)))
        }
        .inspect_err(|_| session.mark_killed())?;

        let reader_thread = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name(READER_THREAD.to_owned())
                .spawn(move || {
                    read_replies(
                        &session,
                        FrameReader::new(reader, REPLY_HEADER_LEN, MAX_FRAME_LEN),
                    )
                })
        };
        let reader_thread = match reader_thread {
            Ok(handle) => handle,
            Err(error) => {
                session.mark_killed();
                drop(writer_thread.join());
                return Err(error.into());
            }
        };

        debug!(target: CHANNEL_TARGET, "channel pump started");
        Ok(Self {
            session,
            reader: reader_thread,
            writer: writer_thread,
        })
    }

    /// Session served by the pump.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Waits for both threads to finish.
    ///
    /// # Errors
    ///
    /// Returns the first failure reported by the writer or the reader.
    pub fn join(self) -> Result<(), ChannelError> {
        let writer = join_thread(self.writer, WRITER_THREAD);
        let reader = join_thread(self.reader, READER_THREAD);
        writer.and(reader)
    }
}

fn join_thread(
    handle: JoinHandle<Result<(), ChannelError>>,
    thread: &'static str,
) -> Result<(), ChannelError> {
    handle
        .join()
        .map_err(|_| ChannelError::Panicked { thread })?
}

fn write_requests<W: Write>(session: &Session, mut writer: FrameWriter<W>) -> Result<(), ChannelError> {
    loop {
        match session.pull() {
            Pulled::Request(frame) => {
                if let Err(error) = writer.write_frame(&frame) {
                    warn!(target: CHANNEL_TARGET, %error, "writing to daemon failed");
                    session.mark_killed();
                    return Err(error.into());
                }
            }
            Pulled::EndOfChannel => {
                debug!(target: CHANNEL_TARGET, "writer reached end of channel");
                return Ok(());
            }
        }
    }
}

fn read_replies<R: Read>(session: &Session, mut reader: FrameReader<R>) -> Result<(), ChannelError> {
    let outcome = loop {
        match reader.read_frame() {
            Ok(Some(frame)) => {
                if let Err(error) = session.push(&frame) {
                    warn!(target: CHANNEL_TARGET, %error, "discarding malformed reply");
                }
            }
            Ok(None) => {
                info!(target: CHANNEL_TARGET, "daemon closed the channel");
                break Ok(());
            }
            Err(error) => {
                warn!(target: CHANNEL_TARGET, %error, "reading from daemon failed");
                break Err(error);
            }
        }
    };
    session.mark_killed();
    outcome
}
