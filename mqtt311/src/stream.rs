//! Framed MQTT stream over any `AsyncRead + AsyncWrite` transport.
//!
//! The read side accumulates header bytes in a [`ReadBuffer`] until the
//! remaining length terminates, hands over whatever payload was already
//! buffered and reads the shortfall straight into the caller's output. Bytes
//! read past the end of a frame stay buffered for the next read.
//!
//! The write side encodes the fixed header into a local array and writes it
//! together with the payload.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

use crate::buffer::{DEFAULT_READ_BUFFER_SIZE, ReadBuffer};
use crate::codec;
use crate::error::{Error, ProtocolError, Result};
use crate::types::{FixedHeader, MAX_FIXED_HEADER_LEN};

/// Default write buffer capacity.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;

/// Default upper bound for frames read into a growable buffer.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Read half of a framed stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    buffer: ReadBuffer,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader with a read buffer of `buffer_size` bytes.
    pub fn new(io: R, buffer_size: usize) -> Result<Self> {
        Ok(Self {
            io,
            buffer: ReadBuffer::new(buffer_size)?,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    /// Set the largest frame accepted by [`FrameReader::read_frame`].
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Read one frame into a growable buffer.
    ///
    /// `out` is cleared and resized to the frame's remaining length.
    pub async fn read_frame(&mut self, out: &mut BytesMut) -> Result<FixedHeader> {
        let (header, header_len) = self.fill_header().await?;
        let len = header.remaining_length as usize;
        if len > self.max_frame_size {
            return Err(Error::MessageTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        self.buffer.consume(header_len);
        out.clear();
        out.resize(len, 0);
        self.read_payload(&mut out[..]).await?;

        trace!("Read frame type=0x{:02x} len={}", header.first_byte, len);
        Ok(header)
    }

    /// Read one frame into a fixed-size buffer.
    ///
    /// A frame longer than `out` fails with [`Error::MessageTooLarge`]; its
    /// header is left in the read buffer and nothing is copied.
    pub async fn read_frame_into(&mut self, out: &mut [u8]) -> Result<FixedHeader> {
        let (header, header_len) = self.fill_header().await?;
        let len = header.remaining_length as usize;
        if len > out.len() {
            return Err(Error::MessageTooLarge {
                size: len,
                max: out.len(),
            });
        }

        self.buffer.consume(header_len);
        self.read_payload(&mut out[..len]).await?;

        trace!("Read frame type=0x{:02x} len={}", header.first_byte, len);
        Ok(header)
    }

    /// Drop any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Number of bytes buffered past the last frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the fixed header, reading from the transport until it is complete.
    async fn fill_header(&mut self) -> Result<(FixedHeader, usize)> {
        loop {
            if let Some(parsed) = codec::read_fixed_header(self.buffer.readable_region())? {
                return Ok(parsed);
            }

            let region = self.buffer.mutable_region()?;
            let n = self.io.read(region).await?;
            if n == 0 {
                return Err(Error::SocketDisconnected);
            }
            self.buffer.commit(n);
        }
    }

    /// Fill `out` from the buffered bytes first, then from the transport.
    async fn read_payload(&mut self, out: &mut [u8]) -> Result<()> {
        let buffered = self.buffer.len().min(out.len());
        out[..buffered].copy_from_slice(&self.buffer.readable_region()[..buffered]);
        self.buffer.consume(buffered);

        if buffered < out.len() {
            self.io
                .read_exact(&mut out[buffered..])
                .await
                .map_err(disconnect_on_eof)?;
        }
        Ok(())
    }
}

/// Write half of a framed stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
    write_buffer: BytesMut,
    write_buffer_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer; frames up to `buffer_size` bytes go out in one write.
    pub fn new(io: W, buffer_size: usize) -> Result<Self> {
        if buffer_size < MAX_FIXED_HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "write buffer size {buffer_size} is smaller than {MAX_FIXED_HEADER_LEN}"
            )));
        }

        Ok(Self {
            io,
            write_buffer: BytesMut::with_capacity(buffer_size),
            write_buffer_size: buffer_size,
        })
    }

    /// Write one frame and flush.
    ///
    /// Returns the number of bytes written (header plus payload). If the
    /// header write fails the payload is not attempted.
    pub async fn write_frame(&mut self, first_byte: u8, payload: &[u8]) -> Result<usize> {
        let remaining_length =
            u32::try_from(payload.len()).map_err(|_| ProtocolError::RemainingLengthTooLarge)?;
        let mut header = [0u8; MAX_FIXED_HEADER_LEN];
        let header_len = codec::write_fixed_header(&mut header, first_byte, remaining_length)?;
        let total = header_len + payload.len();

        if total <= self.write_buffer_size {
            self.write_buffer.clear();
            self.write_buffer.put_slice(&header[..header_len]);
            self.write_buffer.put_slice(payload);
            self.io.write_all(&self.write_buffer).await?;
        } else {
            self.io.write_all(&header[..header_len]).await?;
            self.io.write_all(payload).await?;
        }
        self.io.flush().await?;

        trace!("Wrote frame type=0x{:02x} len={}", first_byte, total);
        Ok(total)
    }
}

/// A transport split into a [`FrameReader`] and a [`FrameWriter`].
#[derive(Debug)]
pub struct FramedStream<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> FramedStream<S> {
    /// Wrap a transport with default buffer sizes.
    pub fn new(io: S) -> Result<Self> {
        Self::with_buffer_sizes(io, DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE)
    }

    /// Wrap a transport with explicit buffer sizes (each at least 5 bytes).
    pub fn with_buffer_sizes(io: S, read_buffer_size: usize, write_buffer_size: usize) -> Result<Self> {
        let (read_half, write_half) = tokio::io::split(io);
        Ok(Self {
            reader: FrameReader::new(read_half, read_buffer_size)?,
            writer: FrameWriter::new(write_half, write_buffer_size)?,
        })
    }

    /// Set the largest frame accepted by [`FramedStream::read_frame`].
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.reader = self.reader.with_max_frame_size(max_frame_size);
        self
    }

    pub async fn read_frame(&mut self, out: &mut BytesMut) -> Result<FixedHeader> {
        self.reader.read_frame(out).await
    }

    pub async fn read_frame_into(&mut self, out: &mut [u8]) -> Result<FixedHeader> {
        self.reader.read_frame_into(out).await
    }

    pub async fn write_frame(&mut self, first_byte: u8, payload: &[u8]) -> Result<usize> {
        self.writer.write_frame(first_byte, payload).await
    }

    /// Split into independently owned halves. Buffered bytes stay with the reader.
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

fn disconnect_on_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::SocketDisconnected
    } else {
        e.into()
    }
}
