//! HTTP response composition (spec.md §4.I).
use super::cookie::CookieJar;
use super::date::now_rfc1123;
use super::headers::HeaderMap;
use super::request::Version;
use super::status::reason_phrase;

/// Builds a response in place: set headers and cookies, then `send` to
/// serialize the whole thing onto a byte buffer handed to the writer.
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    headers: HeaderMap,
    cookies: CookieJar,
    emit_date: bool,
}

impl Response {
    pub fn new(version: Version) -> Response {
        Response { version, headers: HeaderMap::new(), cookies: CookieJar::new(), emit_date: true }
    }

    /// Disables the `Date` header (spec.md §4.I step 3: "if date
    /// emission enabled").
    pub fn disable_date(&mut self) {
        self.emit_date = false;
    }

    /// `value` is stringified in decimal when it is an integer; callers
    /// pass any `Display` value.
    pub fn set_header(&mut self, name: &str, value: impl std::fmt::Display) {
        self.headers.insert(name, value.to_string());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// Serializes `status body` with the canonical reason phrase.
    pub fn send(&mut self, status: u16, body: &[u8]) -> Vec<u8> {
        self.send_with_reason(status, body, reason_phrase(status))
    }

    /// Serializes `status body` with an explicit reason phrase, per
    /// spec.md §4.I steps 1-6.
    pub fn send_with_reason(&mut self, status: u16, body: &[u8], reason: &str) -> Vec<u8> {
        if !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/html");
        }
        if !self.headers.contains("connection") {
            self.headers.insert("Connection", "close");
        }
        self.headers.insert("Content-Length", body.len().to_string());
        if self.emit_date {
            self.headers.insert("Date", now_rfc1123());
        }
        for line in self.cookies.render() {
            self.headers.push("Set-Cookie", line);
        }

        let mut out = Vec::with_capacity(body.len() + 256);
        out.extend_from_slice(format!("{} {} {}\r\n", self.version.as_str(), status, reason).as_bytes());
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{}: {}\r\n", canonical_header_name(name), value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out
    }
}

/// Headers are stored lowercased internally; re-title-case the common
/// ones on the wire since most clients expect it even though HTTP
/// header names are case-insensitive.
fn canonical_header_name(lowercase: &str) -> String {
    lowercase.split('-').map(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) => c.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }).collect::<Vec<_>>().join("-")
}
