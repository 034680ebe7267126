use bytes::Bytes;

use crate::error::Result;
use crate::memory::MemoryPipe;

/// A resource carried out-of-band alongside a packet's bytes.
#[derive(Debug)]
pub enum Handle {
    /// One end of an in-memory message pipe.
    Pipe(MemoryPipe),
    /// An embedder-defined handle value. The transport only moves it.
    Opaque(u64),
}

impl Handle {
    /// Returns the pipe end if this handle carries one.
    pub fn into_pipe(self) -> Option<MemoryPipe> {
        match self {
            Handle::Pipe(pipe) => Some(pipe),
            Handle::Opaque(_) => None,
        }
    }
}

/// One unit read from or written to a message pipe.
#[derive(Debug, Default)]
pub struct Packet {
    /// Serialized message bytes.
    pub data: Bytes,
    /// Handles transferred with the message, in encoding order.
    pub handles: Vec<Handle>,
}

impl Packet {
    /// Create a packet without handles.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            handles: Vec::new(),
        }
    }

    /// Create a packet carrying handles.
    pub fn with_handles(data: impl Into<Bytes>, handles: Vec<Handle>) -> Self {
        Self {
            data: data.into(),
            handles,
        }
    }
}

/// A duplex, message-oriented pipe.
///
/// Packet boundaries are preserved. Writes may come from any thread; reads
/// are expected from a single reader at a time.
pub trait MessagePipe: Send + Sync + 'static {
    /// Write one packet to the peer.
    fn write(&self, packet: Packet) -> Result<()>;

    /// Block until the next packet is readable.
    ///
    /// Returns [`TransportError::Closed`](crate::TransportError::Closed) once
    /// this end was closed, or once the peer closed and every queued packet
    /// has been read.
    fn read(&self) -> Result<Packet>;

    /// Close this end. Pending and future reads on both ends observe the
    /// closure.
    fn close(&self);

    /// Whether [`MessagePipe::close`] was called on this end.
    fn is_closed(&self) -> bool;
}
