use std::borrow::Cow;

use super::headers::HeaderCollection;

const CRLF: &[u8] = b"\r\n";

/// Headers that are either written explicitly from [`ResponseHead`] fields or
/// never forwarded from a handler's header set.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

#[derive(Debug, Clone)]
pub struct ResponseHead<'a> {
    pub status: u16,
    pub reason: &'a str,
    pub headers: &'a HeaderCollection,
    pub content_length: Option<u64>,
    pub connection: Option<&'a str>,
    pub keep_alive: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Name,
    Value,
}

impl Escape {
    fn apply(self, byte: u8) -> u8 {
        match (self, byte) {
            (Escape::Name, b'\r' | b'\n') => b'_',
            (Escape::Value, b'\r' | b'\n') => b' ',
            _ => byte,
        }
    }
}

#[derive(Debug)]
struct Piece<'a> {
    bytes: Cow<'a, [u8]>,
    escape: Escape,
}

/// Resumable serializer for a response status line and header block.
///
/// Each call to [`ResponseHeadEncoder::fill`] writes as much of the head as
/// fits into the caller's buffer, so the head can be streamed through a small
/// fixed buffer no matter how many headers it carries.
#[derive(Debug)]
pub struct ResponseHeadEncoder<'a> {
    pieces: Vec<Piece<'a>>,
    index: usize,
    offset: usize,
}

impl<'a> ResponseHeadEncoder<'a> {
    pub fn new(head: &ResponseHead<'a>) -> Self {
        let mut encoder = Self {
            pieces: Vec::new(),
            index: 0,
            offset: 0,
        };

        encoder.literal(b"HTTP/1.1 ");
        encoder.owned(head.status.to_string().into_bytes());
        encoder.literal(b" ");
        encoder.push(head.reason.as_bytes(), Escape::Value);
        encoder.literal(CRLF);

        if let Some(length) = head.content_length {
            encoder.name(b"Content-Length");
            encoder.owned(length.to_string().into_bytes());
            encoder.literal(CRLF);
        }
        if let Some(connection) = head.connection {
            encoder.field(b"Connection", connection);
            if let Some(hint) = head.keep_alive {
                encoder.field(b"Keep-Alive", hint);
            }
        }
        if let Some(values) = head.headers.get("transfer-encoding") {
            encoder.name(b"Transfer-Encoding");
            encoder.values(values);
        }

        for entry in head.headers.iter() {
            if is_hop_by_hop(&entry.name) {
                continue;
            }
            encoder.push(entry.name.as_bytes(), Escape::Name);
            encoder.literal(b": ");
            encoder.values(&entry.values);
        }

        encoder.literal(CRLF);
        encoder
    }

    pub fn is_done(&self) -> bool {
        self.index == self.pieces.len()
    }

    /// Writes the next bytes of the head into `buffer`; returns 0 once done.
    pub fn fill(&mut self, buffer: &mut [u8]) -> usize {
        let mut written = 0;

        while written < buffer.len() && self.index < self.pieces.len() {
            let piece = &self.pieces[self.index];
            let remaining = &piece.bytes[self.offset..];
            let take = remaining.len().min(buffer.len() - written);

            for (slot, byte) in buffer[written..written + take]
                .iter_mut()
                .zip(&remaining[..take])
            {
                *slot = piece.escape.apply(*byte);
            }

            written += take;
            self.offset += take;
            if self.offset == piece.bytes.len() {
                self.index += 1;
                self.offset = 0;
            }
        }

        written
    }

    fn field(&mut self, name: &'static [u8], value: &'a str) {
        self.name(name);
        self.push(value.as_bytes(), Escape::Value);
        self.literal(CRLF);
    }

    fn name(&mut self, name: &'static [u8]) {
        self.literal(name);
        self.literal(b": ");
    }

    fn values(&mut self, values: &'a [String]) {
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                self.literal(b",");
            }
            self.push(value.as_bytes(), Escape::Value);
        }
        self.literal(CRLF);
    }

    fn literal(&mut self, bytes: &'static [u8]) {
        self.push(bytes, Escape::None);
    }

    fn owned(&mut self, bytes: Vec<u8>) {
        self.pieces.push(Piece {
            bytes: Cow::Owned(bytes),
            escape: Escape::None,
        });
    }

    fn push(&mut self, bytes: &'a [u8], escape: Escape) {
        if bytes.is_empty() {
            return;
        }
        self.pieces.push(Piece {
            bytes: Cow::Borrowed(bytes),
            escape,
        });
    }
}

/// Serializes a whole response head into a new vector.
pub fn encode_response_head(head: &ResponseHead<'_>) -> Vec<u8> {
    let mut encoder = ResponseHeadEncoder::new(head);
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let written = encoder.fill(&mut chunk);
        if written == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..written]);
    }
    bytes
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}
