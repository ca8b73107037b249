use thiserror::Error;
use toolbridge_net::ParseError;

use crate::handler::HandlerError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server configuration error: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),
    #[error("request header block exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },
    #[error("request body of {length} bytes exceeds {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },
    #[error("request transfer encoding {0:?} is not supported")]
    UnsupportedTransferEncoding(String),
    #[error("connection closed with {received} bytes of an unfinished request head")]
    ClosedMidRequest { received: usize },
    #[error("connection closed after {received} of {expected} body bytes")]
    ClosedMidBody { expected: usize, received: usize },
    #[error("handler failed: {0}")]
    Handler(HandlerError),
    #[error("response content declared {declared} bytes but produced {actual}")]
    ContentLengthMismatch { declared: u64, actual: u64 },
    #[error("server IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an error came from: the peer's bytes, the transport, or the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Grammar,
    Transport,
    Handler,
    Setup,
}

impl ServerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServerError::Parse(_)
            | ServerError::HeadersTooLarge { .. }
            | ServerError::BodyTooLarge { .. }
            | ServerError::UnsupportedTransferEncoding(_) => ErrorClass::Grammar,
            ServerError::ClosedMidRequest { .. }
            | ServerError::ClosedMidBody { .. }
            | ServerError::Io(_) => ErrorClass::Transport,
            ServerError::Handler(_) | ServerError::ContentLengthMismatch { .. } => {
                ErrorClass::Handler
            }
            ServerError::Config(_) | ServerError::Bind { .. } => ErrorClass::Setup,
        }
    }

    /// Status and reason for the best-effort error response.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            ServerError::HeadersTooLarge { .. } => (431, "Request Header Fields Too Large"),
            ServerError::BodyTooLarge { .. } => (413, "Content Too Large"),
            ServerError::UnsupportedTransferEncoding(_) => (501, "Not Implemented"),
            ServerError::Parse(_) => (400, "Bad Request"),
            _ => (500, "Internal Server Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use toolbridge_net::{ParseError, ParseErrorKind};

    use super::{ErrorClass, ServerError};

    #[test]
    fn classifies_errors() {
        let parse = ServerError::Parse(ParseError {
            kind: ParseErrorKind::MissingVersion,
            offset: 4,
        });
        assert_eq!(parse.class(), ErrorClass::Grammar);
        assert_eq!(parse.status().0, 400);
        assert_eq!(
            parse.to_string(),
            "malformed request: request line has no HTTP version at byte 4"
        );

        let closed = ServerError::ClosedMidBody {
            expected: 5,
            received: 2,
        };
        assert_eq!(closed.class(), ErrorClass::Transport);
        assert_eq!(closed.status().0, 500);

        let handler = ServerError::Handler("boom".into());
        assert_eq!(handler.class(), ErrorClass::Handler);
        assert_eq!(handler.status(), (500, "Internal Server Error"));

        assert_eq!(
            ServerError::HeadersTooLarge { limit: 10 }.status().0,
            431
        );
    }
}
