//! Errors of the message exchange between the two parties.

use std::error::Error;

/// Failures while talking to the counterparty.
#[derive(Debug)]
pub enum NetError {
    /// Socket failure other than a timeout or a closed connection.
    IO(std::io::Error),

    /// The counterparty closed the connection before a full message arrived.
    ReachedEOF,

    /// No message or connection within the configured timeout.
    ConnectionTimedOut,

    /// A frame that is not a valid CBOR [TradeMessage](crate::protocol::TradeMessage).
    Cbor(serde_cbor::Error),
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for NetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::IO(e) => Some(e),
            Self::Cbor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                Self::ConnectionTimedOut
            }
            std::io::ErrorKind::UnexpectedEof => Self::ReachedEOF,
            _ => Self::IO(value),
        }
    }
}

impl From<serde_cbor::Error> for NetError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Cbor(value)
    }
}
