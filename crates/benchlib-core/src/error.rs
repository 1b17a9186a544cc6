//! Error types for benchlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Byte-channel, framing, parsing,
//! configuration, and connection failures are all captured here.

/// The error type for all benchlib operations.
///
/// Every variant carries enough text to be shown to an operator as-is;
/// [`Error::kind`] gives a coarse classification for callers that need to
/// react differently to, say, a dead socket versus a garbled reply.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A byte-channel failure (GPIB session, TCP socket, serial port).
    #[error("transport error: {0}")]
    Transport(String),

    /// A framing failure, e.g. a malformed or unsupported binary block header.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response could not be converted to the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The bench configuration is incomplete or inconsistent
    /// (missing model name, missing address, unknown role).
    #[error("configuration error: {0}")]
    Config(String),

    /// An instrument failed to reach the open state.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation was stopped before it completed.
    #[error("cancelled")]
    Cancelled,

    /// Timed out waiting for the instrument.
    #[error("timeout waiting for response")]
    Timeout,

    /// No connection to the instrument has been established.
    #[error("not connected")]
    NotConnected,

    /// The requested operation is not supported by this instrument model.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to an instrument command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Parse,
    Config,
    Connection,
    Cancelled,
    Unsupported,
    InvalidParameter,
}

impl Error {
    /// Classify this error.
    ///
    /// Timeouts, lost connections, and raw I/O errors are all transport
    /// failures from the caller's point of view.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) | Error::Timeout | Error::NotConnected | Error::Io(_) => {
                ErrorKind::Transport
            }
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Config(_) => ErrorKind::Config,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("TCP read timeout".into());
        assert_eq!(e.to_string(), "transport error: TCP read timeout");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("Indefinite-length block (#0) not supported".into());
        assert_eq!(
            e.to_string(),
            "protocol error: Indefinite-length block (#0) not supported"
        );
    }

    #[test]
    fn error_display_parse() {
        let e = Error::Parse("Parse failed (not a number): 'N/A' from VOLT?".into());
        assert_eq!(
            e.to_string(),
            "parse error: Parse failed (not a number): 'N/A' from VOLT?"
        );
    }

    #[test]
    fn error_display_unit_variants() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn kind_separates_transport_from_parse() {
        assert_eq!(Error::Timeout.kind(), ErrorKind::Transport);
        assert_eq!(Error::NotConnected.kind(), ErrorKind::Transport);
        assert_eq!(Error::Transport("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(Error::Parse("x".into()).kind(), ErrorKind::Parse);
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Protocol);
        assert_ne!(
            Error::Parse("x".into()).kind(),
            Error::Transport("x".into()).kind()
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
