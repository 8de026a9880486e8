//! Length-prefixed framing over byte streams.
//!
//! Every frame starts with its own total length as a little-endian `u32`, so
//! the reader takes four bytes, then the rest of the frame:
//! ```text
//! | len: u32 | remaining len - 4 bytes |
//! ```

use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};

use bytes::{Buf, Bytes, BytesMut};

use super::ChannelError;

/// Width of the length field that opens every frame.
const LENGTH_PREFIX: usize = 4;

/// Reads whole frames from a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    min_len: usize,
    max_len: usize,
}

impl<R: Read> FrameReader<R> {
    /// Creates a reader accepting frames between `min_len` and `max_len`
    /// bytes, header included.
    #[must_use]
    pub fn new(reader: R, min_len: usize, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            min_len: min_len.max(LENGTH_PREFIX),
            max_len,
        }
    }

    /// Reads the next frame; `None` once the stream ends between frames.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::FrameTooShort`] or
    /// [`ChannelError::FrameTooLarge`] for a length outside the accepted
    /// range and [`ChannelError::Io`] when the stream fails or ends inside a
    /// frame.
    pub fn read_frame(&mut self) -> Result<Option<Bytes>, ChannelError> {
        let mut prefix = [0_u8; LENGTH_PREFIX];
        match self.reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error.into()),
        }

        let declared = prefix.as_slice().get_u32_le();
        let len = usize::try_from(declared).map_err(|_| ChannelError::FrameTooLarge {
            len: declared,
            max: self.max_len,
        })?;
        if len < self.min_len {
            return Err(ChannelError::FrameTooShort {
                len: declared,
                min: self.min_len,
            });
        }
        if len > self.max_len {
            return Err(ChannelError::FrameTooLarge {
                len: declared,
                max: self.max_len,
            });
        }

        let mut frame = BytesMut::zeroed(len);
        let (head, rest) = frame.split_at_mut(LENGTH_PREFIX);
        head.copy_from_slice(&prefix);
        self.reader.read_exact(rest)?;
        Ok(Some(frame.freeze()))
    }
}

/// Writes whole frames to a byte stream.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps `writer` in a buffered frame writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes one already-framed message and flushes it.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()
    }
}
