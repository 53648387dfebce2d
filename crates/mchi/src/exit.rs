use std::fmt;
use std::io;

use mchi_frame::FrameError;
use mchi_jor::JorError;
use mchi_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
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

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TIMEOUT, message)
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
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { ref source, .. } | TransportError::Bind { ref source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        TransportError::Io(source) => io_error(context, source),
        TransportError::WriteTimeout { .. } => CliError::timeout(format!("{context}: {err}")),
        TransportError::Geometry(_) => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::PayloadTooLarge { .. } | FrameError::UnexpectedEof { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::OutboundStalled { .. } => CliError::timeout(format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn jor_error(context: &str, err: JorError) -> CliError {
    match err {
        JorError::Transport(err) => transport_error(context, err),
        JorError::Frame(err) => frame_error(context, err),
        JorError::NotConnected => CliError::new(FAILURE, format!("{context}: {err}")),
        JorError::ControlNotFound { .. }
        | JorError::ValueMismatch { .. }
        | JorError::SelectorIndexOutOfRange { .. } => CliError::usage(format!("{context}: {err}")),
        JorError::Dictionary { source, .. } => io_error(context, source),
        JorError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_outbound_tags_map_to_timeout() {
        let err = frame_error(
            "flush failed",
            FrameError::OutboundStalled {
                sent: 2,
                pending: 5,
                waited: std::time::Duration::from_secs(2),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.contains("5 waiting"));
    }

    #[test]
    fn stalled_ring_maps_to_timeout() {
        let err = transport_error(
            "send failed",
            TransportError::WriteTimeout {
                waited: std::time::Duration::from_secs(2),
                written: 0,
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("send failed: "));
    }

    #[test]
    fn nested_errors_keep_transport_code() {
        let err = jor_error(
            "pump failed",
            JorError::Frame(FrameError::Transport(TransportError::InvalidChunkMagic {
                offset: 0x20,
            })),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn bad_input_is_usage() {
        let err = jor_error(
            "set failed",
            JorError::SelectorIndexOutOfRange { index: 4, len: 2 },
        );
        assert_eq!(err.code, USAGE);
    }
}
