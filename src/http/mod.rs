//! HTTP wire format: request parsing, URL/cookie codecs, response
//! composition, and supporting status/date tables (spec.md §4.F-§4.I).
pub mod cookie;
pub mod date;
pub mod headers;
pub mod request;
pub mod response;
pub mod status;
pub mod url;

pub use cookie::{CookieJar, CookiePair};
pub use headers::HeaderMap;
pub use request::{BodyParser, HeaderParser, ParsedHead, Request, RequestError, Version};
pub use response::Response;
pub use url::{Path, Query, Url};
