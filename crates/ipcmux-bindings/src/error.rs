use ipcmux_wire::InterfaceId;

/// Errors surfaced by the binding layer.
#[derive(Debug, thiserror::Error)]
pub enum BindingsError {
    /// An inbound message failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ipcmux_wire::ValidationError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipcmux_transport::TransportError),

    /// The endpoint's peer is gone or the pipe failed.
    #[error("endpoint disconnected")]
    Disconnected,

    /// The id cannot back a new endpoint handle.
    #[error("interface id {0} cannot be claimed")]
    InvalidInterfaceId(InterfaceId),

    /// A message could not be handed to the router.
    #[error("send failed on interface {0}")]
    SendFailed(InterfaceId),

    /// The task runner no longer accepts tasks.
    #[error("task runner stopped")]
    TaskRunnerStopped,
}

pub type Result<T> = std::result::Result<T, BindingsError>;
