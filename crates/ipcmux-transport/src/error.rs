/// Errors that can occur in message pipe operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the underlying byte stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// This end or the peer end of the pipe has been closed.
    #[error("message pipe closed")]
    Closed,

    /// A framed packet header did not start with the expected magic.
    #[error("invalid packet magic (expected 0x4d58 \"MX\")")]
    InvalidMagic,

    /// The packet exceeds the configured maximum size.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The pipe cannot carry out-of-band handles.
    #[error("transport cannot carry handles ({count} attached)")]
    HandlesUnsupported { count: usize },
}

impl TransportError {
    /// Returns true when the error means the pipe is gone for good.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
