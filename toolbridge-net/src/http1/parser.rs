use super::headers::HeaderCollection;
use super::types::{HeaderLine, HttpVersion, ParseError, ParseErrorKind, RequestHead, RequestLine};

const CRLF: &[u8] = b"\r\n";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Finds the end of the header block in `buffer`.
///
/// Returns the index one past the `CRLF CRLF` terminator. With
/// `skip_leading_blank_lines`, empty lines in front of the request line are
/// not mistaken for the terminator. `resume_offset` is the buffer length at the
/// previous call: scanning restarts three bytes before it, so a terminator
/// split across two reads is still found.
pub fn find_header_block_end(
    buffer: &[u8],
    skip_leading_blank_lines: bool,
    resume_offset: usize,
) -> Option<usize> {
    let leading = if skip_leading_blank_lines {
        leading_blank_lines(buffer)
    } else {
        0
    };
    let start = leading.max(resume_offset.saturating_sub(HEADER_TERMINATOR.len() - 1));
    if start >= buffer.len() {
        return None;
    }

    twoway::find_bytes(&buffer[start..], HEADER_TERMINATOR)
        .map(|index| start + index + HEADER_TERMINATOR.len())
}

/// Parses the request line at the front of `window`, skipping blank lines.
///
/// Returns the line and the number of bytes consumed, including its CRLF.
pub fn parse_request_line(window: &[u8]) -> Result<(RequestLine, usize), ParseError> {
    let start = leading_blank_lines(window);
    let line_end = find_line_end(window, start)
        .ok_or(ParseError::new(ParseErrorKind::MalformedRequestLine, start))?;
    let line = &window[start..line_end];

    let (method, rest) = match split_once(line, b' ') {
        Some((method, rest)) => (method, Some(rest)),
        None => (line, None),
    };
    if method.is_empty() {
        return Err(ParseError::new(ParseErrorKind::MissingMethod, start));
    }

    let target_offset = start + method.len() + 1;
    let rest = rest.ok_or(ParseError::new(ParseErrorKind::MissingTarget, line_end))?;
    let (target, version) = match split_once(rest, b' ') {
        Some((target, version)) => (target, version),
        None if rest.is_empty() => {
            return Err(ParseError::new(ParseErrorKind::MissingTarget, target_offset));
        }
        None => return Err(ParseError::new(ParseErrorKind::MissingVersion, line_end)),
    };
    if target.is_empty() {
        return Err(ParseError::new(ParseErrorKind::MissingTarget, target_offset));
    }

    let version_offset = target_offset + target.len() + 1;
    if version.is_empty() {
        return Err(ParseError::new(ParseErrorKind::MissingVersion, version_offset));
    }
    let version = parse_http_version(version, version_offset)?;

    let method = std::str::from_utf8(method)
        .map_err(|_| ParseError::new(ParseErrorKind::MalformedRequestLine, start))?;
    let target = std::str::from_utf8(target)
        .map_err(|_| ParseError::new(ParseErrorKind::MalformedRequestLine, target_offset))?;

    Ok((
        RequestLine {
            method: method.to_string(),
            target: target.to_string(),
            version,
        },
        line_end + CRLF.len(),
    ))
}

/// Parses the header line at the front of `window`.
///
/// Returns the classified line and the number of bytes consumed.
pub fn parse_header_line(window: &[u8]) -> Result<(HeaderLine<'_>, usize), ParseError> {
    let line_end = find_line_end(window, 0)
        .ok_or(ParseError::new(ParseErrorKind::MissingHeaderTerminator, 0))?;
    let line = &window[..line_end];
    let consumed = line_end + CRLF.len();

    if line.is_empty() {
        return Ok((HeaderLine::End, consumed));
    }

    if is_whitespace(line[0]) {
        return Ok((
            HeaderLine::Continuation {
                value: trim_window(line),
            },
            consumed,
        ));
    }

    let (name, value) = split_once(line, b':')
        .ok_or(ParseError::new(ParseErrorKind::MalformedHeaderLine, 0))?;
    let name = trim_window(name);
    if name.is_empty() {
        return Err(ParseError::new(ParseErrorKind::EmptyHeaderName, 0));
    }

    Ok((
        HeaderLine::Field {
            name,
            value: trim_window(value),
        },
        consumed,
    ))
}

/// Parses a complete header block (as delimited by [`find_header_block_end`]).
pub fn parse_request_head(block: &[u8]) -> Result<RequestHead, ParseError> {
    let (line, mut cursor) = parse_request_line(block)?;
    let mut headers = HeaderCollection::new();
    let mut pending: Option<(String, String)> = None;

    loop {
        let (header_line, consumed) =
            parse_header_line(&block[cursor..]).map_err(|err| err.shifted(cursor))?;

        match header_line {
            HeaderLine::End => break,
            HeaderLine::Continuation { value } => {
                let Some((_, current)) = pending.as_mut() else {
                    return Err(ParseError::new(ParseErrorKind::OrphanContinuation, cursor));
                };
                if !value.is_empty() {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(window_text(value, cursor)?);
                }
            }
            HeaderLine::Field { name, value } => {
                if let Some((name, value)) = pending.take() {
                    headers.append(&name, &value);
                }
                pending = Some((
                    window_text(name, cursor)?.to_string(),
                    window_text(value, cursor)?.to_string(),
                ));
            }
        }

        cursor += consumed;
    }

    if let Some((name, value)) = pending {
        headers.append(&name, &value);
    }

    Ok(RequestHead { line, headers })
}

/// Reads `Content-Length`. Repeated identical values are accepted.
pub fn content_length(headers: &HeaderCollection) -> Result<Option<usize>, ParseError> {
    let Some(values) = headers.get("content-length") else {
        return Ok(None);
    };

    let mut length = None;
    for value in values {
        if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(ParseError::new(ParseErrorKind::InvalidContentLength, 0));
        }
        let parsed = value
            .parse::<usize>()
            .map_err(|_| ParseError::new(ParseErrorKind::InvalidContentLength, 0))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(ParseError::new(ParseErrorKind::InvalidContentLength, 0));
            }
            _ => length = Some(parsed),
        }
    }

    Ok(length)
}

/// Narrows `window` past surrounding spaces and tabs without copying.
pub fn trim_window(window: &[u8]) -> &[u8] {
    let start = window
        .iter()
        .position(|byte| !is_whitespace(*byte))
        .unwrap_or(window.len());
    let end = window
        .iter()
        .rposition(|byte| !is_whitespace(*byte))
        .map_or(start, |index| index + 1);
    &window[start..end]
}

fn parse_http_version(token: &[u8], offset: usize) -> Result<HttpVersion, ParseError> {
    match token {
        b"HTTP/1.0" => Ok(HttpVersion::Http10),
        b"HTTP/1.1" => Ok(HttpVersion::Http11),
        other => Err(ParseError::new(
            ParseErrorKind::UnknownVersion(String::from_utf8_lossy(other).into_owned()),
            offset,
        )),
    }
}

fn leading_blank_lines(buffer: &[u8]) -> usize {
    let mut offset = 0;
    while buffer[offset..].starts_with(CRLF) {
        offset += CRLF.len();
    }
    offset
}

fn find_line_end(buffer: &[u8], start: usize) -> Option<usize> {
    twoway::find_bytes(&buffer[start..], CRLF).map(|offset| start + offset)
}

fn split_once(window: &[u8], delimiter: u8) -> Option<(&[u8], &[u8])> {
    let index = window.iter().position(|byte| *byte == delimiter)?;
    Some((&window[..index], &window[index + 1..]))
}

fn window_text(window: &[u8], offset: usize) -> Result<&str, ParseError> {
    std::str::from_utf8(window)
        .map_err(|_| ParseError::new(ParseErrorKind::InvalidHeaderEncoding, offset))
}

fn is_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}
