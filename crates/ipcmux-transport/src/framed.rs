//! Message pipe over a byte stream.
//!
//! Every packet is framed with:
//! - A 2-byte magic number ("MX") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian handle count (always zero on the wire, since
//!   byte streams cannot carry handles)

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{MessagePipe, Packet};

/// Frame header: magic (2) + length (4) + handle count (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "MX" (0x4d 0x58).
pub const MAGIC: [u8; 2] = [0x4d, 0x58];

/// Default maximum packet size: 16 MiB.
pub const DEFAULT_MAX_PACKET: usize = 16 * 1024 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for a framed pipe.
#[derive(Debug, Clone)]
pub struct FramedPipeConfig {
    /// Maximum packet size in bytes. Default: 16 MiB.
    pub max_packet_size: usize,
}

impl Default for FramedPipeConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET,
        }
    }
}

/// Encode packet bytes into the framed wire format.
///
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Handles  │ Payload          │
/// │ 0x4d 0x58    │ (4B LE)   │ (2B LE)  │ (Length bytes)   │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_packet(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(TransportError::PacketTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u16_le(0);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one framed packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_packet: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let handle_count = u16::from_le_bytes([src[6], src[7]]) as usize;

    if handle_count != 0 {
        return Err(TransportError::HandlesUnsupported {
            count: handle_count,
        });
    }
    if payload_len > max_packet {
        return Err(TransportError::PacketTooLarge {
            size: payload_len,
            max: max_packet,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

struct ReadHalf<R> {
    inner: R,
    buf: BytesMut,
}

struct WriteHalf<W> {
    inner: W,
    buf: BytesMut,
}

type ShutdownFn = Box<dyn Fn() + Send + Sync>;

/// A [`MessagePipe`] carrying packets over a `Read` half and a `Write` half.
pub struct FramedPipe<R, W> {
    reader: Mutex<ReadHalf<R>>,
    writer: Mutex<WriteHalf<W>>,
    config: FramedPipeConfig,
    closed: AtomicBool,
    shutdown: Option<ShutdownFn>,
}

impl<R: Read, W: Write> FramedPipe<R, W> {
    /// Create a framed pipe with default configuration.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, FramedPipeConfig::default())
    }

    /// Create a framed pipe with explicit configuration.
    pub fn with_config(reader: R, writer: W, config: FramedPipeConfig) -> Self {
        Self {
            reader: Mutex::new(ReadHalf {
                inner: reader,
                buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            }),
            writer: Mutex::new(WriteHalf {
                inner: writer,
                buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            }),
            config,
            closed: AtomicBool::new(false),
            shutdown: None,
        }
    }

    /// Current pipe configuration.
    pub fn config(&self) -> &FramedPipeConfig {
        &self.config
    }

    fn read_packet(&self) -> Result<Bytes> {
        let mut half = self.reader.lock();
        let ReadHalf { inner, buf } = &mut *half;
        loop {
            if let Some(payload) = decode_packet(buf, self.config.max_packet_size)? {
                return Ok(payload);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                return Err(TransportError::Closed);
            }

            buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn write_packet(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: payload.len(),
                max: self.config.max_packet_size,
            });
        }

        let mut half = self.writer.lock();
        let WriteHalf { inner, buf } = &mut *half;
        buf.clear();
        encode_packet(payload, buf)?;

        let mut offset = 0usize;
        while offset < buf.len() {
            match inner.write(&buf[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

#[cfg(unix)]
impl FramedPipe<std::os::unix::net::UnixStream, std::os::unix::net::UnixStream> {
    /// Frame packets over a connected Unix domain socket.
    ///
    /// Closing the pipe shuts the socket down in both directions, which
    /// unblocks a reader parked in `read`.
    pub fn from_unix_stream(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let mut pipe = Self::new(reader, stream);
        pipe.shutdown = Some(Box::new(move || {
            let _ = control.shutdown(std::net::Shutdown::Both);
        }));
        Ok(pipe)
    }
}

impl<R, W> MessagePipe for FramedPipe<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    fn write(&self, packet: Packet) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !packet.handles.is_empty() {
            return Err(TransportError::HandlesUnsupported {
                count: packet.handles.len(),
            });
        }
        self.write_packet(packet.data.as_ref())
    }

    fn read(&self) -> Result<Packet> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.read_packet().map(Packet::new)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing framed pipe");
        if let Some(shutdown) = &self.shutdown {
            shutdown();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
