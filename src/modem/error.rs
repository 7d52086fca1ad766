//! Error types for modem operations.

use thiserror::Error;

/// Unified error type for modem operations.
#[derive(Debug, Error)]
pub enum ModemError {
    /// The serial port could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        /// Device path that failed to open.
        port: String,
        /// The underlying serial error.
        source: tokio_serial::Error,
    },

    /// Read or write failure on the serial port.
    #[error("serial port error: {0}")]
    Port(#[from] std::io::Error),

    /// The modem never echoed the command back.
    #[error("no command echo")]
    NoEcho,

    /// The echoed text differed from the command that was sent.
    #[error("expected echo {sent:?}, got {got:?}")]
    EchoMismatch {
        /// The command text that was written.
        sent: String,
        /// The echo line actually read.
        got: String,
    },

    /// The modem echoed the command but never replied.
    #[error("no response")]
    NoReply,

    /// A reply was read but could not be interpreted.
    #[error("unparseable reply {reply:?}: {detail}")]
    UnparseableReply {
        /// The reply line as read from the wire.
        reply: String,
        /// What was expected of it.
        detail: String,
    },

    /// The modem worker has shut down.
    #[error("modem worker is gone")]
    WorkerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_mismatch_display() {
        let err = ModemError::EchoMismatch {
            sent: "ATZ".to_string(),
            got: "ATH0".to_string(),
        };
        assert!(err.to_string().contains("ATZ"));
        assert!(err.to_string().contains("ATH0"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: ModemError = io_err.into();
        assert!(matches!(err, ModemError::Port(_)));
    }
}
