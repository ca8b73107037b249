mod encoder;
mod headers;
mod parser;
mod types;

pub use encoder::{ResponseHead, ResponseHeadEncoder, encode_response_head};
pub use headers::{HeaderCollection, HeaderEntry};
pub use parser::{
    content_length, find_header_block_end, parse_header_line, parse_request_head,
    parse_request_line, trim_window,
};
pub use types::{
    HeaderLine, HttpVersion, ParseError, ParseErrorKind, RequestHead, RequestLine,
};
