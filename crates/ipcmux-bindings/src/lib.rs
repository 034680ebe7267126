//! Associated-interface multiplexing for ipcmux.
//!
//! A [`MultiplexRouter`] owns one message pipe and carries any number of
//! independently closable endpoints over it. Each endpoint is driven by an
//! [`InterfaceEndpointClient`] pinned to a [`TaskRunner`]:
//! - inbound messages are demultiplexed by interface id and delivered in
//!   order on the client's runner
//! - sync calls block their runner while still dispatching sync messages
//!   addressed to it, so peers can call each other reentrantly
//! - closing an endpoint, or losing the pipe, reaches the peer through the
//!   pipe control protocol
//!
//! Built-in interface control messages answer version queries and version
//! requirements without involving application code.

pub mod client;
mod connector;
pub mod endpoint;
pub mod error;
pub mod interface_control;
pub mod pipe_control;
pub mod router;
pub mod sync;
pub mod task;

pub use client::{
    ClientConfig, InterfaceEndpointClient, MessageReceiver, PayloadValidator, Responder,
};
pub use endpoint::{AssociatedGroupController, EndpointClient, ScopedInterfaceEndpointHandle};
pub use error::{BindingsError, Result};
pub use pipe_control::DisconnectReason;
pub use router::{EndpointStatus, MultiplexRouter, RouterConfig};
pub use sync::{SyncEvent, SyncKey, SyncRegistry};
pub use task::{Task, TaskRunner, ThreadTaskRunner};
