//! Multiplexed associated-interface IPC over a single message pipe.
//!
//! Many logical interface endpoints share one pipe. Each endpoint keeps its
//! own message order, closes independently of the others, and can take part
//! in reentrant synchronous calls across the pipe.
//!
//! # Crate Structure
//!
//! - [`transport`]: message pipes (in-memory pairs, framed byte streams)
//! - [`wire`]: the binary wire format, validation and [`wire::Message`]
//! - [`bindings`]: the multiplexing router, endpoint handles, clients and
//!   the pipe and interface control protocols

/// Re-export transport types.
pub mod transport {
    pub use ipcmux_transport::*;
}

/// Re-export wire format types.
pub mod wire {
    pub use ipcmux_wire::*;
}

/// Re-export router and endpoint types.
pub mod bindings {
    pub use ipcmux_bindings::*;
}

pub use ipcmux_bindings::{
    ClientConfig, InterfaceEndpointClient, MessageReceiver, MultiplexRouter, RouterConfig,
    ScopedInterfaceEndpointHandle, ThreadTaskRunner,
};
pub use ipcmux_wire::{InterfaceId, Message, MessageFlags};
