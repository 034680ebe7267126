use std::fmt;
use std::io;

use ipcmux_bindings::BindingsError;
use ipcmux_transport::TransportError;
use ipcmux_wire::ValidationError;

// Process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidMagic
        | TransportError::PacketTooLarge { .. }
        | TransportError::HandlesUnsupported { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        TransportError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn validation_error(context: &str, err: ValidationError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {} ({err})", err.code()))
}

pub fn bindings_error(context: &str, err: BindingsError) -> CliError {
    match err {
        BindingsError::Validation(err) => validation_error(context, err),
        BindingsError::Transport(err) => transport_error(context, err),
        BindingsError::Disconnected | BindingsError::SendFailed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_exit_codes() {
        let err = validation_error("inspect", ValidationError::MessageTooShort);
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("VALIDATION_ERROR_"));

        let err = transport_error("read", TransportError::Closed);
        assert_eq!(err.code, TRANSPORT_ERROR);

        let err = io_error("open", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.code, PERMISSION_DENIED);

        let err = bindings_error("call", BindingsError::Disconnected);
        assert_eq!(err.code, FAILURE);
    }
}
