//! Resumable per-(connection, direction) HTTP/1.x stream parser (spec.md
//! §4.3). Phases are a closed tagged variant per spec.md §9's design note,
//! so transitions stay exhaustively checkable rather than boolean flags.

use std::collections::HashMap;

use bytes::BytesMut;
use sniffer_core::model::{
    BodyEncoding, ConnectionId, Endpoint, HttpMessageRecord, MessageDirection,
};
use sniffer_core::time::now_iso8601_millis;
use tracing::warn;

const MAX_HEADER_SLOTS: usize = 64;

#[derive(Debug, Clone, Copy)]
enum ChunkPhase {
    Size,
    Data { remaining: usize },
    ZeroTrailer,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Headers,
    BodyLength { remaining: u64 },
    BodyChunked { chunk: ChunkPhase },
    NonHttp,
}

#[derive(Default)]
struct InProgress {
    method: Option<String>,
    path: Option<String>,
    status_code: Option<u16>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    body_truncated: bool,
}

/// Per-(connection, direction) state. Owned by the connection; spawned
/// lazily on first delivered chunk (spec.md §3).
pub struct HttpStreamParser {
    connection_id: ConnectionId,
    direction: MessageDirection,
    receiver: Endpoint,
    destination: Endpoint,
    max_body_size: u32,
    accumulator: BytesMut,
    phase: Phase,
    message: InProgress,
    non_http_logged: bool,
}

impl HttpStreamParser {
    pub fn new(
        connection_id: ConnectionId,
        direction: MessageDirection,
        receiver: Endpoint,
        destination: Endpoint,
        max_body_size: u32,
    ) -> Self {
        Self {
            connection_id,
            direction,
            receiver,
            destination,
            max_body_size,
            accumulator: BytesMut::new(),
            phase: Phase::Headers,
            message: InProgress::default(),
            non_http_logged: false,
        }
    }

    /// Append `data` to the accumulator and advance as far as possible,
    /// invoking `on_message` for each completed record. A single call may
    /// yield zero or more messages. Returns `true` exactly once per
    /// parser — on the call whose bytes first tip it into `NonHttp` — so
    /// the caller can count the transition without re-deriving it from
    /// phase state.
    pub fn feed(&mut self, data: &[u8], mut on_message: impl FnMut(HttpMessageRecord)) -> bool {
        self.accumulator.extend_from_slice(data);

        loop {
            match self.phase {
                Phase::NonHttp => {
                    self.accumulator.clear();
                    return false;
                }
                Phase::Headers => {
                    let Some(boundary) = find_header_boundary(&self.accumulator) else {
                        return false;
                    };
                    let header_block = self.accumulator.split_to(boundary);
                    match parse_start_and_headers(&header_block) {
                        Some(parsed) => {
                            self.message.method = parsed.method;
                            self.message.path = parsed.path;
                            self.message.status_code = parsed.status_code;
                            self.message.headers = parsed.headers;
                            self.phase = if parsed.chunked {
                                Phase::BodyChunked {
                                    chunk: ChunkPhase::Size,
                                }
                            } else {
                                Phase::BodyLength {
                                    remaining: parsed.content_length,
                                }
                            };
                        }
                        None => {
                            return self.enter_non_http();
                        }
                    }
                }
                Phase::BodyLength { remaining } => {
                    if remaining == 0 {
                        let record = self.emit();
                        on_message(record);
                        continue;
                    }
                    if self.accumulator.is_empty() {
                        return false;
                    }
                    let take = (remaining as usize).min(self.accumulator.len());
                    let chunk = self.accumulator.split_to(take);
                    self.append_body(&chunk);
                    let left = remaining - take as u64;
                    if left == 0 {
                        let record = self.emit();
                        on_message(record);
                    } else {
                        self.phase = Phase::BodyLength { remaining: left };
                        return false;
                    }
                }
                Phase::BodyChunked { chunk } => match chunk {
                    ChunkPhase::Size => {
                        let Some(line_end) = find_lf(&self.accumulator) else {
                            return false;
                        };
                        let line = self.accumulator.split_to(line_end + 1);
                        let Some(size) = parse_chunk_size(&line) else {
                            return self.enter_non_http();
                        };
                        self.phase = if size == 0 {
                            Phase::BodyChunked {
                                chunk: ChunkPhase::ZeroTrailer,
                            }
                        } else {
                            Phase::BodyChunked {
                                chunk: ChunkPhase::Data { remaining: size + 2 },
                            }
                        };
                    }
                    ChunkPhase::Data { remaining } => {
                        if self.accumulator.len() < remaining {
                            return false;
                        }
                        let piece = self.accumulator.split_to(remaining);
                        let body_len = remaining - 2;
                        self.append_body(&piece[..body_len]);
                        self.phase = Phase::BodyChunked {
                            chunk: ChunkPhase::Size,
                        };
                    }
                    ChunkPhase::ZeroTrailer => {
                        let Some(line_end) = find_lf(&self.accumulator) else {
                            return false;
                        };
                        self.accumulator.split_to(line_end + 1);
                        let record = self.emit();
                        on_message(record);
                    }
                },
            }
        }
    }

    fn append_body(&mut self, data: &[u8]) {
        let capacity_left = self.max_body_size as usize - self.message.body.len();
        if data.len() > capacity_left {
            self.message.body.extend_from_slice(&data[..capacity_left]);
            self.message.body_truncated = true;
        } else {
            self.message.body.extend_from_slice(data);
        }
    }

    fn emit(&mut self) -> HttpMessageRecord {
        let body_encoding = if std::str::from_utf8(&self.message.body).is_ok() {
            None
        } else {
            Some(BodyEncoding::Binary)
        };
        let record = HttpMessageRecord {
            receiver: self.receiver.clone(),
            destination: self.destination.clone(),
            direction: self.direction,
            headers: std::mem::take(&mut self.message.headers),
            method: self.message.method.take(),
            path: self.message.path.take(),
            status_code: self.message.status_code.take(),
            body: std::mem::take(&mut self.message.body),
            body_truncated: self.message.body_truncated,
            body_encoding,
            timestamp: now_iso8601_millis(),
        };
        self.message = InProgress::default();
        self.phase = Phase::Headers;
        record
    }

    /// Returns `true` the first time this parser enters `NonHttp`.
    fn enter_non_http(&mut self) -> bool {
        self.phase = Phase::NonHttp;
        self.accumulator.clear();
        self.message = InProgress::default();
        if self.non_http_logged {
            false
        } else {
            self.non_http_logged = true;
            warn!(
                connection_id = %self.connection_id,
                direction = ?self.direction,
                "non-HTTP stream detected"
            );
            true
        }
    }
}

struct ParsedHeaders {
    method: Option<String>,
    path: Option<String>,
    status_code: Option<u16>,
    headers: HashMap<String, String>,
    chunked: bool,
    content_length: u64,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_header_boundary(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
        return Some(pos + 4);
    }
    find_subslice(buf, b"\n\n").map(|pos| pos + 2)
}

fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_start_line(line: &[u8]) -> Option<(Option<String>, Option<String>, Option<u16>)> {
    let line = std::str::from_utf8(line).ok()?;
    if let Some(rest) = line.strip_prefix("HTTP/") {
        let mut parts = rest.splitn(2, ' ');
        let _version = parts.next()?;
        let status_rest = parts.next()?;
        let status_str = status_rest.split(' ').next()?;
        let status_code = status_str.parse::<u16>().ok()?;
        Some((None, None, Some(status_code)))
    } else {
        let first_sp = line.find(' ')?;
        let method = line[..first_sp].to_string();
        let remainder = &line[first_sp + 1..];
        let second_sp = remainder.find(' ')?;
        let path = remainder[..second_sp].to_string();
        Some((Some(method), Some(path), None))
    }
}

fn parse_start_and_headers(block: &[u8]) -> Option<ParsedHeaders> {
    let line_end = find_lf(block)?;
    let start_line = trim_crlf(&block[..line_end]);
    let (method, path, status_code) = parse_start_line(start_line)?;
    let rest = &block[line_end + 1..];

    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADER_SLOTS];
    let parsed = httparse::parse_headers(rest, &mut raw_headers).ok()?;
    let header_slice = match parsed {
        httparse::Status::Complete((_, hdrs)) => hdrs,
        httparse::Status::Partial => return None,
    };

    let mut headers = HashMap::new();
    for h in header_slice {
        let name = h.name.to_ascii_lowercase();
        let value = String::from_utf8_lossy(h.value).trim().to_string();
        headers.insert(name, value);
    }

    let chunked = headers.get("transfer-encoding").is_some_and(|v| {
        v.to_ascii_lowercase()
            .split(',')
            .any(|token| token.trim() == "chunked")
    });
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    Some(ParsedHeaders {
        method,
        path,
        status_code,
        headers,
        chunked,
        content_length,
    })
}

fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let end = line
        .iter()
        .position(|b| !(*b as char).is_ascii_hexdigit())
        .unwrap_or(line.len());
    if end == 0 {
        return None;
    }
    usize::from_str_radix(std::str::from_utf8(&line[..end]).ok()?, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(direction: MessageDirection, max_body_size: u32) -> HttpStreamParser {
        HttpStreamParser::new(
            ConnectionId("10.0.0.1:1|10.0.0.2:80".to_string()),
            direction,
            Endpoint::new("10.0.0.2", 80),
            Endpoint::new("10.0.0.1", 1),
            max_body_size,
        )
    }

    #[test]
    fn single_get_request() {
        let mut p = parser(MessageDirection::Request, 1_048_576);
        let mut out = Vec::new();
        p.feed(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n", |m| out.push(m));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].method.as_deref(), Some("GET"));
        assert_eq!(out[0].path.as_deref(), Some("/health"));
        assert_eq!(out[0].headers.get("host").map(String::as_str), Some("x"));
        assert!(out[0].body.is_empty());
    }

    #[test]
    fn single_response_with_content_length() {
        let mut p = parser(MessageDirection::Response, 1_048_576);
        let mut out = Vec::new();
        p.feed(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
            |m| out.push(m),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status_code, Some(200));
        assert_eq!(&out[0].body, b"ok");
    }

    #[test]
    fn chunked_response_reassembles_body() {
        let mut p = parser(MessageDirection::Response, 1_048_576);
        let mut out = Vec::new();
        p.feed(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            |m| out.push(m),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].body, b"hello world");
    }

    #[test]
    fn request_split_across_many_single_byte_chunks_yields_same_record() {
        let whole = b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut p = parser(MessageDirection::Request, 1_048_576);
        let mut out = Vec::new();
        for byte in whole {
            p.feed(&[*byte], |m| out.push(m));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].method.as_deref(), Some("GET"));
        assert_eq!(out[0].path.as_deref(), Some("/health"));
    }

    #[test]
    fn body_exceeding_cap_is_truncated_and_stream_stays_aligned() {
        let mut p = parser(MessageDirection::Response, 4);
        let mut out = Vec::new();
        p.feed(
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
            |m| out.push(m),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0].body, b"0123");
        assert!(out[0].body_truncated);
        assert_eq!(&out[1].body, b"ok");
        assert!(!out[1].body_truncated);
    }

    #[test]
    fn pipelined_keep_alive_yields_two_messages_in_order() {
        let mut p = parser(MessageDirection::Request, 1_048_576);
        let mut out = Vec::new();
        p.feed(
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
            |m| out.push(m),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path.as_deref(), Some("/a"));
        assert_eq!(out[1].path.as_deref(), Some("/b"));
    }

    #[test]
    fn non_utf8_body_is_marked_binary() {
        let mut p = parser(MessageDirection::Response, 1_048_576);
        let mut out = Vec::new();
        let mut frame = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n".to_vec();
        frame.extend_from_slice(&[0xff, 0xfe]);
        p.feed(&frame, |m| out.push(m));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body_encoding, Some(BodyEncoding::Binary));
    }

    #[test]
    fn malformed_start_line_enters_non_http_and_drops_further_bytes() {
        let mut p = parser(MessageDirection::Request, 1_048_576);
        let mut out = Vec::new();
        let entered = p.feed(b"\x00\x01\x02garbage\r\n\r\n", |m| out.push(m));
        assert!(out.is_empty());
        assert!(entered);
        let entered_again = p.feed(b"GET /health HTTP/1.1\r\n\r\n", |m| out.push(m));
        assert!(out.is_empty());
        assert!(!entered_again);
    }

    #[test]
    fn content_length_zero_emits_empty_body_immediately() {
        let mut p = parser(MessageDirection::Request, 1_048_576);
        let mut out = Vec::new();
        p.feed(b"GET / HTTP/1.1\r\n\r\n", |m| out.push(m));
        assert_eq!(out.len(), 1);
        assert!(out[0].body.is_empty());
    }
}
