use std::fmt;

use super::headers::HeaderCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
}

/// Request line plus headers of one request, as read from a complete header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub line: RequestLine,
    pub headers: HeaderCollection,
}

/// One line of a header block, borrowed from the block it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLine<'a> {
    Field { name: &'a [u8], value: &'a [u8] },
    Continuation { value: &'a [u8] },
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }

    pub(crate) fn shifted(mut self, base: usize) -> Self {
        self.offset += base;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    MalformedRequestLine,
    MissingMethod,
    MissingTarget,
    MissingVersion,
    UnknownVersion(String),
    MissingHeaderTerminator,
    MalformedHeaderLine,
    EmptyHeaderName,
    OrphanContinuation,
    InvalidHeaderEncoding,
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::MalformedRequestLine => {
                f.write_str("request line is not terminated by CRLF or is not valid text")
            }
            ParseErrorKind::MissingMethod => f.write_str("request line has no method"),
            ParseErrorKind::MissingTarget => f.write_str("request line has no target"),
            ParseErrorKind::MissingVersion => f.write_str("request line has no HTTP version"),
            ParseErrorKind::UnknownVersion(version) => {
                write!(f, "unsupported HTTP version {version:?}")
            }
            ParseErrorKind::MissingHeaderTerminator => {
                f.write_str("header line is not terminated by CRLF")
            }
            ParseErrorKind::MalformedHeaderLine => f.write_str("header line has no ':' separator"),
            ParseErrorKind::EmptyHeaderName => f.write_str("header line has an empty name"),
            ParseErrorKind::OrphanContinuation => {
                f.write_str("continuation line appears before any header")
            }
            ParseErrorKind::InvalidHeaderEncoding => f.write_str("header is not valid UTF-8"),
            ParseErrorKind::InvalidContentLength => f.write_str("invalid Content-Length value"),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind, self.offset)
    }
}

impl std::error::Error for ParseError {}
