use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use toolbridge_net::{
    HeaderCollection, ResponseHead, ResponseHeadEncoder, content_length, find_header_block_end,
    parse_request_head,
};

use crate::error::{ErrorClass, ServerError};
use crate::handler::{Handler, Request};
use crate::pool::Pooled;
use crate::server::Shared;

/// Upper bound on bytes discarded while draining a closing connection.
const MAX_DRAIN_BYTES: usize = 64 * 1024;

/// Where a connection is within one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ReceivingHeaders,
    ReceivingBody,
    AwaitingHandler,
    BufferingResponseBody,
    SendingHeaders,
    SendingBody,
    Done,
}

impl Stage {
    /// An error response is only possible while no response byte is in flight.
    pub fn can_send_error(self) -> bool {
        self < Stage::SendingHeaders
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    Close,
    PeerGone,
}

/// Serves every request on `stream` until the peer or policy ends it.
///
/// `cancel` aborts the connection at whatever suspension point it is in.
/// `stopping` lets the current exchange finish and then closes.
pub(crate) async fn serve_connection<S, H>(
    shared: Arc<Shared<H>>,
    stream: S,
    remote: SocketAddr,
    cancel: CancellationToken,
    stopping: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler,
{
    let span = info_span!("connection", remote = %remote);
    async move {
        debug!("connection accepted");
        let connection = Connection::new(&shared, stream, remote, stopping);
        tokio::select! {
            _ = cancel.cancelled() => debug!("connection aborted by cancellation"),
            requests = connection.run() => debug!(requests, "connection finished"),
        }
    }
    .instrument(span)
    .await
}

struct Connection<'s, S, H> {
    shared: &'s Shared<H>,
    stream: S,
    remote: SocketAddr,
    stopping: CancellationToken,
    request_buf: Pooled<'s, Box<[u8]>>,
    head_buf: Pooled<'s, Box<[u8]>>,
    body_buf: Pooled<'s, Vec<u8>>,
    content_buf: Pooled<'s, Vec<u8>>,
    filled: usize,
    request_number: u32,
    stage: Stage,
}

impl<'s, S, H> Connection<'s, S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler,
{
    fn new(shared: &'s Shared<H>, stream: S, remote: SocketAddr, stopping: CancellationToken) -> Self {
        Self {
            shared,
            stream,
            remote,
            stopping,
            request_buf: shared.pools.bytes.take(),
            head_buf: shared.pools.bytes.take(),
            body_buf: shared.pools.memory.take(),
            content_buf: shared.pools.memory.take(),
            filled: 0,
            request_number: 0,
            stage: Stage::ReceivingHeaders,
        }
    }

    /// Runs exchanges until the connection ends; returns the request count.
    async fn run(mut self) -> u32 {
        loop {
            match self.exchange().await {
                Ok(Next::KeepAlive) => continue,
                Ok(Next::Close) => {
                    self.close_gracefully().await;
                    break;
                }
                Ok(Next::PeerGone) => break,
                Err(err) => {
                    self.fail(err).await;
                    break;
                }
            }
        }
        self.request_number
    }

    async fn exchange(&mut self) -> Result<Next, ServerError> {
        let shared = self.shared;

        self.stage = Stage::ReceivingHeaders;
        let Some(head_end) = self.receive_head().await? else {
            return Ok(Next::PeerGone);
        };
        let head = parse_request_head(&self.request_buf[..head_end])?;
        self.request_number += 1;
        debug!(
            request = self.request_number,
            method = %head.line.method,
            target = %head.line.target,
            "request head received"
        );

        self.stage = Stage::ReceivingBody;
        let has_body = self.receive_body(&head.headers, head_end).await?;

        self.stage = Stage::AwaitingHandler;
        let request_close = head.headers.contains_token("connection", "close")
            || head.headers.contains_token("connection", "upgrade");
        let is_head = head.line.method.eq_ignore_ascii_case("HEAD");
        let request = Request {
            line: head.line,
            headers: head.headers,
            body: has_body.then_some(&self.body_buf[..]),
            remote: self.remote,
        };
        let mut response = shared
            .handler
            .handle(&request)
            .await
            .map_err(ServerError::Handler)?;
        drop(request);

        self.stage = Stage::BufferingResponseBody;
        self.content_buf.clear();
        if let Some(content) = response.content.take() {
            content.buffer_into(&mut self.content_buf).await?;
        }

        self.stage = Stage::SendingHeaders;
        let keep_alive = !request_close
            && !response.headers.contains_token("connection", "close")
            && self.request_number < shared.config.keep_alive.max_requests
            && !self.stopping.is_cancelled();
        apply_default_headers(shared, &mut response.headers);
        let bodiless = matches!(response.status, 100..=199 | 204 | 304);
        let head = ResponseHead {
            status: response.status,
            reason: &response.reason,
            headers: &response.headers,
            content_length: (!bodiless).then_some(self.content_buf.len() as u64),
            connection: Some(if keep_alive { "keep-alive" } else { "close" }),
            keep_alive: (keep_alive && self.request_number == 1)
                .then_some(shared.keep_alive_hint.as_str()),
        };
        self.write_head(&head).await?;

        self.stage = Stage::SendingBody;
        if !bodiless && !is_head && !self.content_buf.is_empty() {
            self.stream.write_all(&self.content_buf).await?;
        }
        self.stream.flush().await?;

        self.stage = Stage::Done;
        debug!(
            request = self.request_number,
            status = response.status,
            bytes = self.content_buf.len(),
            keep_alive,
            "response sent"
        );

        Ok(if keep_alive { Next::KeepAlive } else { Next::Close })
    }

    /// Reads until a complete header block is buffered. Returns `None` when
    /// the peer went away, or the connection sat idle, between requests.
    async fn receive_head(&mut self) -> Result<Option<usize>, ServerError> {
        let mut scanned = 0;
        loop {
            if let Some(end) =
                find_header_block_end(&self.request_buf[..self.filled], true, scanned)
            {
                return Ok(Some(end));
            }
            scanned = self.filled;

            if self.filled == self.request_buf.len() {
                return Err(ServerError::HeadersTooLarge {
                    limit: self.request_buf.len(),
                });
            }

            let read = if self.filled == 0 {
                let idle = self.shared.config.keep_alive.idle_timeout();
                tokio::select! {
                    result = tokio::time::timeout(
                        idle,
                        self.stream.read(&mut self.request_buf[..]),
                    ) => match result {
                        Ok(read) => read?,
                        Err(_) => {
                            debug!(request = self.request_number, "idle timeout");
                            return Ok(None);
                        }
                    },
                    _ = self.stopping.cancelled() => return Ok(None),
                }
            } else {
                self.stream
                    .read(&mut self.request_buf[self.filled..])
                    .await?
            };

            if read == 0 {
                let buffered = &self.request_buf[..self.filled];
                if buffered.iter().all(|byte| *byte == b'\r' || *byte == b'\n') {
                    return Ok(None);
                }
                return Err(ServerError::ClosedMidRequest {
                    received: self.filled,
                });
            }
            self.filled += read;
        }
    }

    /// Moves the request body into the body buffer and keeps any bytes past
    /// it at the front of the request buffer for the next exchange.
    async fn receive_body(
        &mut self,
        headers: &HeaderCollection,
        head_end: usize,
    ) -> Result<bool, ServerError> {
        if let Some(encoding) = headers.get_joined("transfer-encoding") {
            return Err(ServerError::UnsupportedTransferEncoding(encoding));
        }
        let length = content_length(headers)?.unwrap_or(0);
        let limit = self.shared.config.limits.max_body_bytes;
        if length > limit {
            return Err(ServerError::BodyTooLarge { length, limit });
        }

        let from_buffer = (self.filled - head_end).min(length);
        let consumed = head_end + from_buffer;
        self.body_buf.clear();
        self.body_buf
            .extend_from_slice(&self.request_buf[head_end..consumed]);
        self.request_buf.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;

        if length == 0 {
            return Ok(false);
        }

        let mut received = from_buffer;
        self.body_buf.resize(length, 0);
        while received < length {
            let read = self.stream.read(&mut self.body_buf[received..]).await?;
            if read == 0 {
                return Err(ServerError::ClosedMidBody {
                    expected: length,
                    received,
                });
            }
            received += read;
        }

        Ok(true)
    }

    async fn write_head(&mut self, head: &ResponseHead<'_>) -> Result<(), ServerError> {
        let mut encoder = ResponseHeadEncoder::new(head);
        loop {
            let written = encoder.fill(&mut self.head_buf);
            if written == 0 {
                return Ok(());
            }
            self.stream.write_all(&self.head_buf[..written]).await?;
        }
    }

    async fn fail(&mut self, err: ServerError) {
        let class = err.class();
        if class == ErrorClass::Transport {
            debug!(stage = ?self.stage, request = self.request_number, error = %err, "connection lost");
        } else {
            warn!(stage = ?self.stage, request = self.request_number, class = ?class, error = %err, "request failed");
        }

        if !self.stage.can_send_error() {
            return;
        }
        match self.send_error(&err).await {
            Ok(()) => self.close_gracefully().await,
            Err(write_err) => {
                debug!(error = %write_err, "could not deliver error response");
            }
        }
    }

    async fn send_error(&mut self, err: &ServerError) -> Result<(), ServerError> {
        let (status, reason) = err.status();
        let message = match err.class() {
            ErrorClass::Grammar => format!("{status} {reason}: {err}\r\n"),
            _ => format!("{status} {reason}\r\n"),
        };

        let mut headers = HeaderCollection::new();
        headers.set("Content-Type", "text/plain; charset=utf-8");
        apply_default_headers(self.shared, &mut headers);
        let head = ResponseHead {
            status,
            reason,
            headers: &headers,
            content_length: Some(message.len() as u64),
            connection: Some("close"),
            keep_alive: None,
        };
        self.write_head(&head).await?;
        self.stream.write_all(message.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Half-closes, then discards what the peer still sends for a bounded
    /// time so the close does not turn into a reset.
    async fn close_gracefully(&mut self) {
        if let Err(err) = self.stream.shutdown().await {
            debug!(error = %err, "shutdown failed");
            return;
        }

        let limit = self.shared.config.keep_alive.drain_timeout();
        let stream = &mut self.stream;
        let scratch = &mut self.request_buf[..];
        let drain = async move {
            let mut discarded = 0;
            while discarded < MAX_DRAIN_BYTES {
                match stream.read(scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => discarded += read,
                }
            }
        };
        let _ = tokio::time::timeout(limit, drain).await;
    }
}

fn apply_default_headers<H>(shared: &Shared<H>, headers: &mut HeaderCollection) {
    for header in &shared.config.default_headers {
        if !headers.contains(&header.name) {
            headers.set(&header.name, &header.value);
        }
    }
}
