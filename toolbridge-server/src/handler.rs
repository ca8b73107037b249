use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt};
use toolbridge_net::{HeaderCollection, HttpVersion, RequestLine};

use crate::error::ServerError;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Application side of the server: turns one parsed request into a response.
///
/// Ordinary application failures should be expressed as error responses.
/// Returning `Err` aborts the exchange with a `500` and closes the connection.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        request: &Request<'_>,
    ) -> impl Future<Output = Result<Response, HandlerError>> + Send;
}

/// Handler built from a synchronous closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Request<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    fn handle(
        &self,
        request: &Request<'_>,
    ) -> impl Future<Output = Result<Response, HandlerError>> + Send {
        std::future::ready((self.0)(request))
    }
}

/// A fully received request. The body borrows the connection's body buffer.
#[derive(Debug)]
pub struct Request<'b> {
    pub line: RequestLine,
    pub headers: HeaderCollection,
    pub body: Option<&'b [u8]>,
    pub remote: SocketAddr,
}

impl Request<'_> {
    pub fn method(&self) -> &str {
        &self.line.method
    }

    pub fn target(&self) -> &str {
        &self.line.target
    }

    pub fn version(&self) -> HttpVersion {
        self.line.version
    }

    pub fn body_bytes(&self) -> &[u8] {
        self.body.unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderCollection,
    pub content: Option<ResponseContent>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: canonical_reason(status).to_string(),
            headers: HeaderCollection::new(),
            content: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.with_content(ResponseContent::from_bytes(bytes))
    }

    pub fn with_content(mut self, content: ResponseContent) -> Self {
        self.content = Some(content);
        self
    }
}

/// Response payload. It is read to the end before the head is written.
pub struct ResponseContent {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    length: Option<u64>,
}

impl ResponseContent {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let length = bytes.len() as u64;
        Self {
            reader: Box::new(std::io::Cursor::new(bytes)),
            length: Some(length),
        }
    }

    /// Content produced by `reader`. When `length` is given, the reader must
    /// yield exactly that many bytes.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static, length: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            length,
        }
    }

    pub fn declared_length(&self) -> Option<u64> {
        self.length
    }

    pub(crate) async fn buffer_into(mut self, out: &mut Vec<u8>) -> Result<(), ServerError> {
        self.reader.read_to_end(out).await?;
        let actual = out.len() as u64;
        match self.length {
            Some(declared) if declared != actual => {
                Err(ServerError::ContentLengthMismatch { declared, actual })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ResponseContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseContent")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Content Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Content",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{Response, ResponseContent};
    use crate::error::ServerError;

    #[test]
    fn builds_responses() {
        let response = Response::new(404).with_header("X-Tool", "a, b");

        assert_eq!(response.reason, "Not Found");
        assert_eq!(response.headers.get("x-tool").unwrap(), &["a", "b"]);
        assert!(response.content.is_none());
    }

    #[tokio::test]
    async fn buffers_declared_content() {
        let content = ResponseContent::from_bytes("hello");
        assert_eq!(content.declared_length(), Some(5));

        let mut out = Vec::new();
        content.buffer_into(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn rejects_length_mismatch() {
        let content = ResponseContent::from_reader(&b"abc"[..], Some(5));

        let mut out = Vec::new();
        assert_matches!(
            content.buffer_into(&mut out).await,
            Err(ServerError::ContentLengthMismatch {
                declared: 5,
                actual: 3
            })
        );
    }

    #[tokio::test]
    async fn accepts_undeclared_length() {
        let content = ResponseContent::from_reader(&b"streamed"[..], None);

        let mut out = Vec::new();
        content.buffer_into(&mut out).await.unwrap();
        assert_eq!(out.len(), 8);
    }
}
