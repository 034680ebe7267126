//! Message pipe abstraction for ipcmux.
//!
//! This is the lowest layer of ipcmux: a duplex, packet-oriented pipe that
//! moves bytes plus out-of-band handles. Two backends are provided:
//! - [`MemoryPipe`]: an in-process pipe pair that can also carry handles
//! - [`FramedPipe`]: packets framed over any byte stream (e.g. Unix sockets)
//!
//! Everything else builds on the [`MessagePipe`] trait.

pub mod error;
pub mod framed;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use framed::{FramedPipe, FramedPipeConfig, DEFAULT_MAX_PACKET};
pub use memory::MemoryPipe;
pub use traits::{Handle, MessagePipe, Packet};
