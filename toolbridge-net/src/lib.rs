//! Byte-level HTTP/1.1 grammar: header-block scanning, request-line and
//! header-line parsing, and response-head serialization. Nothing here
//! performs I/O.

mod http1;

pub use http1::{
    HeaderCollection, HeaderEntry, HeaderLine, HttpVersion, ParseError, ParseErrorKind,
    RequestHead, RequestLine, ResponseHead, ResponseHeadEncoder, content_length,
    encode_response_head, find_header_block_end, parse_header_line, parse_request_head,
    parse_request_line, trim_window,
};
