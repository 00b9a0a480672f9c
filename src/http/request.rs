//! Incremental HTTP request parser (spec.md §4.F): `Idle →
//! HeaderAccumulating → HeaderComplete → (BodyReading | Done) → Done`.
//!
//! Header splitting is hand-rolled rather than delegated to a strict
//! parser crate because the tolerant bare-`\n\n` terminator spec.md
//! requires (in addition to the canonical `\r\n\r\n`) is not something
//! a strict RFC-7230 tokenizer accepts; the line-splitting approach
//! below is manual byte scanning rather than a parser combinator.
use super::headers::HeaderMap;
use super::url::Url;
use crate::fiber::io::Consumed;

use std::collections::HashMap;

use super::status::reason_phrase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum RequestError {
        BadRequestLine {
            description("request line did not split into method, target, version")
        }
        UnknownMethod(method: String) {
            description("method not implemented")
            display("method not implemented: {}", method)
        }
        UnsupportedVersion {
            description("unsupported HTTP version")
        }
        EmptyPath {
            description("request-target has an empty path")
        }
        TransferEncodingUnsupported {
            description("chunked transfer encoding is not supported")
        }
        BadContentLength {
            description("Content-Length is not a non-negative integer")
        }
        BodyNotAccepted {
            description("method does not accept a request body")
        }
        HeaderTooLarge {
            description("header section exceeded the configured limit")
        }
        BodyTooLarge {
            description("Content-Length exceeded the configured body limit")
        }
        BodyOverrun {
            description("received more body bytes than announced")
        }
        HandlerAborted {
            description("body consumer aborted")
        }
    }
}

impl RequestError {
    /// The status code this error is reported to the client as
    /// (spec.md §4.F/§7: `400`/`413`/`501`/`505`).
    pub fn status(&self) -> u16 {
        match self {
            RequestError::BadRequestLine => 400,
            RequestError::UnknownMethod(_) => 501,
            RequestError::UnsupportedVersion => 505,
            RequestError::EmptyPath => 400,
            RequestError::TransferEncodingUnsupported => 501,
            RequestError::BadContentLength => 400,
            RequestError::BodyNotAccepted => 501,
            RequestError::HeaderTooLarge => 413,
            RequestError::BodyTooLarge => 413,
            RequestError::BodyOverrun => 400,
            RequestError::HandlerAborted => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status())
    }
}

/// The request line, headers, and declared body length — everything
/// known after `HeaderComplete` but before the body is read.
#[derive(Debug, Clone)]
pub struct ParsedHead {
    pub method: String,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub content_length: usize,
}

/// A fully parsed request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

fn parse_head(raw: &[u8], methods: &HashMap<&'static str, crate::config::MethodSpec>) -> Result<ParsedHead, RequestError> {
    let text = String::from_utf8_lossy(raw);
    let normalized = text.replace("\r\n", "\n");
    let mut lines = normalized.trim_end_matches('\n').split('\n');

    let request_line = lines.next().unwrap_or("");
    let mut tokens = request_line.split(|c: char| c == ' ' || c == '\t').filter(|s| !s.is_empty());
    let (method, target, version_str) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(m), Some(t), Some(v)) if tokens.next().is_none() => (m, t, v),
        _ => return Err(RequestError::BadRequestLine),
    };

    let method_spec = methods.get(method).copied().ok_or_else(|| RequestError::UnknownMethod(method.to_string()))?;

    let version = match version_str {
        "HTTP/1.0" => Version::Http10,
        "HTTP/1.1" => Version::Http11,
        _ => return Err(RequestError::UnsupportedVersion),
    };

    if target.is_empty() {
        return Err(RequestError::EmptyPath);
    }
    let url = Url::parse(target);

    let mut headers = HeaderMap::new();
    for line in lines {
        if let Some(pos) = line.find(':') {
            let name = line[..pos].trim();
            let value = line[pos + 1..].trim();
            if !name.is_empty() {
                headers.insert(name, value);
            }
        }
    }

    if headers.contains("transfer-encoding") {
        return Err(RequestError::TransferEncodingUnsupported);
    }

    let content_length = match headers.get("content-length") {
        None => 0,
        Some(raw) => {
            let raw = raw.trim();
            if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RequestError::BadContentLength);
            }
            raw.parse::<usize>().map_err(|_| RequestError::BadContentLength)?
        }
    };

    if content_length > 0 && !method_spec.accepts_body {
        return Err(RequestError::BodyNotAccepted);
    }

    Ok(ParsedHead { method: method.to_string(), url, version, headers, content_length })
}

/// Drives the `HeaderAccumulating`/`HeaderComplete` phase: feed it the
/// `fiber::io::Reader`'s unconsumed prefix via `consume`, then collect
/// the result with `take_result`/`take_error`. Holds an owning
/// reference to the method table (rather than borrowing it) so the
/// parser can live inside a connection's own state alongside its config
/// without a lifetime parameter.
pub struct HeaderParser {
    header_length_limit: usize,
    methods: std::rc::Rc<HashMap<&'static str, crate::config::MethodSpec>>,
    result: Option<ParsedHead>,
    error: Option<RequestError>,
}

impl HeaderParser {
    pub fn new(header_length_limit: usize, methods: std::rc::Rc<HashMap<&'static str, crate::config::MethodSpec>>) -> HeaderParser {
        HeaderParser { header_length_limit, methods, result: None, error: None }
    }

    pub fn consume(&mut self, buf: &[u8]) -> Consumed {
        if buf.len() > self.header_length_limit {
            self.error = Some(RequestError::HeaderTooLarge);
            return Consumed::Done(0);
        }
        match find_header_end(buf) {
            None => Consumed::NeedMore,
            Some(end) => {
                match parse_head(&buf[..end], &self.methods) {
                    Ok(head) => {
                        self.result = Some(head);
                        Consumed::Done(end)
                    }
                    Err(err) => {
                        self.error = Some(err);
                        Consumed::Done(0)
                    }
                }
            }
        }
    }

    pub fn take_result(&mut self) -> Option<ParsedHead> {
        self.result.take()
    }

    pub fn take_error(&mut self) -> Option<RequestError> {
        self.error.take()
    }

    /// Clears any leftover result/error from the previous request so the
    /// parser can be reused for the next one on a keep-alive connection
    /// (spec.md §4.F: "request object is reusable; reset() clears all
    /// buffers but retains allocated capacity").
    pub fn reset(&mut self) {
        self.result = None;
        self.error = None;
    }
}

/// Drives the `BodyReading` phase once `content_length` is known.
pub struct BodyParser {
    content_length: usize,
    body: Vec<u8>,
    error: Option<RequestError>,
}

impl BodyParser {
    /// Validates `content_length` against `body_length_limit` up front
    /// (spec.md §4.F: `Content-Length > body_limit ⇒ 413`).
    pub fn new(content_length: usize, body_length_limit: usize) -> Result<BodyParser, RequestError> {
        if content_length > body_length_limit {
            return Err(RequestError::BodyTooLarge);
        }
        Ok(BodyParser { content_length, body: Vec::new(), error: None })
    }

    pub fn consume(&mut self, buf: &[u8]) -> Consumed {
        if buf.len() > self.content_length {
            self.error = Some(RequestError::BodyOverrun);
            return Consumed::Done(0);
        }
        if buf.len() == self.content_length {
            self.body = buf.to_vec();
            Consumed::Done(self.content_length)
        } else {
            Consumed::NeedMore
        }
    }

    pub fn take_error(&mut self) -> Option<RequestError> {
        self.error.take()
    }

    /// Takes the completed body. Empty until `consume` has returned
    /// `Consumed::Done`.
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}
