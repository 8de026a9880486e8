//! Transport and correlation core of a userspace filesystem bridge.
//!
//! A [`Session`] sits between callers issuing filesystem operations and a
//! daemon that implements them. Callers serialise requests into pooled
//! tickets and either block for the reply ([`Session::dispatch_sync`]) or
//! receive it through a callback ([`Session::dispatch_async`]). The daemon
//! side pulls requests in submission order ([`Session::pull`]) and pushes
//! replies ([`Session::push`]), which are matched back to their callers by
//! correlation id regardless of arrival order.
//!
//! The first request of every session is the `INIT` handshake; all other
//! requests wait until it completes. A session is torn down exactly once,
//! after which every pending call fails with
//! [`DispatchError::Disconnected`].
//!
//! [`ChannelPump`] drives a session over a pair of byte streams, and
//! [`SessionRegistry`] keeps a bounded table of sessions addressed by handle.
//!
//! # Example
//!
//! ```rust,no_run
//! use fusebridge_config::SessionLimits;
//! use fusebridge_ipc::{CallContext, ChannelPump, Opcode, Session};
//! use std::os::unix::net::UnixStream;
//!
//! let stream = UnixStream::connect("/tmp/daemon.sock").expect("daemon listening");
//! let session = Session::open(SessionLimits::default());
//! let pump = ChannelPump::spawn(
//!     session.clone(),
//!     stream.try_clone().expect("clone stream"),
//!     stream,
//! )
//! .expect("pump starts");
//!
//! let context = CallContext::current_process();
//! session.handshake(&context).expect("protocol negotiated");
//! let attributes = session
//!     .dispatch_sync(Opcode::Getattr, 1, &[], &context)
//!     .expect("root attributes");
//! println!("{} attribute bytes", attributes.body().len());
//!
//! session.close();
//! drop(pump);
//! ```

pub mod channel;
pub mod error;
pub mod interrupt;
pub mod opcode;
pub mod registry;
pub mod session;
pub mod shape;
mod ticket;
pub mod wire;

#[cfg(test)]
mod tests;

pub use self::channel::{ChannelError, ChannelPump, FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use self::error::{DispatchError, ProtocolError};
pub use self::interrupt::Interrupt;
pub use self::opcode::{Opcode, UnknownOpcode};
pub use self::registry::{RegistryError, SessionHandle, SessionRegistry};
pub use self::session::{CallContext, Pulled, Session, SessionStats};
pub use self::shape::ReplyShape;
pub use self::ticket::Reply;
pub use self::wire::{
    Credentials, ErrorConvention, Protocol, REPLY_HEADER_LEN, REQUEST_HEADER_LEN, ReplyHeader,
    RequestHeader,
};
