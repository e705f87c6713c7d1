// ABOUTME: Frame-based TCP I/O for SMPP sessions on either side of the link
// ABOUTME: Separates recoverable malformed PDUs from fatal framing and socket errors

use crate::codec::{CodecError, Encodable, Frame, PduHeader};
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection reset by peer")]
    Reset,

    /// A complete PDU arrived but could not be decoded. The bytes have been
    /// consumed, so the stream is still in sync and the peer can be nacked.
    #[error("malformed PDU with sequence number {sequence_number}: {source}")]
    Malformed {
        sequence_number: u32,
        #[source]
        source: CodecError,
    },

    /// The length prefix itself is unusable; the stream cannot be resynchronised.
    #[error("framing error: {0}")]
    Framing(CodecError),

    #[error("failed to encode outbound PDU: {0}")]
    Encode(CodecError),
}

impl ConnectionError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConnectionError::Malformed { .. })
    }
}

/// SMPP connection: a buffered TCP stream plus the read buffer frames are
/// parsed from.
///
/// The struct only moves frames. Session state (open, bound, unbound) lives
/// in the session handler that owns it.
#[derive(Debug)]
pub struct Connection {
    // Write side is buffered; every write_frame flushes.
    stream: BufWriter<TcpStream>,

    // The buffer for reading frames.
    buffer: BytesMut,
}

impl Connection {
    /// Create a new `Connection`, backed by `socket`.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Connection> {
        let socket = TcpStream::connect(addr).await?;
        Ok(Connection::new(socket))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Read a single `Frame` value from the underlying stream.
    ///
    /// Waits until a whole PDU is buffered. Returns `None` when the peer
    /// closes the socket on a frame boundary.
    ///
    /// Cancel safe: partially read PDUs stay in the buffer, so this can sit
    /// in a `select!` next to outbound traffic.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                // A clean shutdown leaves nothing half-read behind.
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ConnectionError::Reset)
                };
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let mut buf = Cursor::new(&self.buffer[..]);

        let len = match Frame::check(&mut buf) {
            Ok(len) => len,
            Err(CodecError::Incomplete) => return Ok(None),
            Err(e) => return Err(ConnectionError::Framing(e)),
        };

        let parsed = Frame::parse(&self.buffer[..len]);
        let sequence_number = if len >= PduHeader::SIZE {
            u32::from_be_bytes([
                self.buffer[12],
                self.buffer[13],
                self.buffer[14],
                self.buffer[15],
            ])
        } else {
            0
        };

        // The PDU is consumed whether or not it decoded.
        self.buffer.advance(len);

        match parsed {
            Ok(frame) => Ok(Some(frame)),
            Err(source) => Err(ConnectionError::Malformed {
                sequence_number,
                source,
            }),
        }
    }

    /// Write a single `Frame` and flush it to the socket.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let bytes = frame.to_bytes().map_err(ConnectionError::Encode)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush and close the write half.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
