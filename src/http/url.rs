//! URL parser (spec.md §4.G): decomposes a request-target into host, an
//! ordered list of non-empty path segments, and an ordered query
//! key/value list with RFC 2396 percent-decoded values.
use std::collections::HashSet;

/// Ordered, `/`-split path with empty segments dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    fn parse(raw: &str, lowercase: bool) -> Path {
        let raw = if lowercase { raw.to_ascii_lowercase() } else { raw.to_string() };
        let segments = raw.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect();
        Path { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.as_str())
    }
}

impl std::ops::Index<usize> for Path {
    type Output = str;
    fn index(&self, index: usize) -> &str {
        &self.segments[index]
    }
}

/// Ordered `(key, decoded_value)` pairs. Keys are never decoded and are
/// matched byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    fn parse(raw: &str, ignore: &HashSet<u8>) -> Query {
        let mut pairs = Vec::new();
        if raw.is_empty() {
            return Query { pairs };
        }
        for kv in raw.split('&') {
            if kv.is_empty() {
                continue;
            }
            let (key, value) = match kv.find('=') {
                Some(pos) => (&kv[..pos], &kv[pos + 1..]),
                None => (kv, ""),
            };
            pairs.push((key.to_string(), percent_decode(value, ignore)));
        }
        Query { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// A parsed URL: the owned decoded string, `host`, `path`, `query`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Url {
    raw: String,
    host: String,
    path: Path,
    query: Query,
}

impl Url {
    /// Parses a request-target (`/path?query`, or an absolute
    /// `scheme://host/path?query`) for standalone use. `lowercase_path`
    /// applies ASCII case-folding to the path before segmentation.
    pub fn parse(raw: &str) -> Url {
        Url::parse_with(raw, false, &HashSet::new())
    }

    pub fn parse_with(raw: &str, lowercase_path: bool, ignore: &HashSet<u8>) -> Url {
        let mut rest = raw;
        let mut host = String::new();

        if let Some(scheme_end) = rest.find("://") {
            let after_scheme = &rest[scheme_end + 3..];
            let authority_end = after_scheme.find(['/', '?']).unwrap_or(after_scheme.len());
            host = after_scheme[..authority_end].to_ascii_lowercase();
            rest = &after_scheme[authority_end..];
        }

        let (path_part, query_part) = match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };

        Url {
            raw: raw.to_string(),
            host,
            path: Path::parse(path_part, lowercase_path),
            query: Query::parse(query_part, ignore),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }
}

/// Decodes `%XX` escapes per RFC 2396. An invalid escape (not two hex
/// digits) is left intact rather than rejected. Bytes listed in `ignore`
/// are never decoded even if validly escaped — used to preserve a
/// literal `&` or `=` inside a value when a pathological encoder quotes
/// the separator itself. The non-standard `%uXXXX` form is not
/// recognized.
pub fn percent_decode(input: &str, ignore: &HashSet<u8>) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        let decoded = hi * 16 + lo;
                        if ignore.contains(&decoded) {
                            out.push(bytes[i]);
                            out.push(bytes[i + 1]);
                            out.push(bytes[i + 2]);
                        } else {
                            out.push(decoded);
                        }
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_path_and_drops_empty_segments() {
        let url = Url::parse("/foo//bar/");
        assert_eq!(url.path().len(), 2);
        assert_eq!(&url.path()[0], "foo");
        assert_eq!(&url.path()[1], "bar");
    }

    #[test]
    fn decodes_query_values_but_not_keys() {
        let url = Url::parse("/search?q=hello%20world&raw%5Fkey=1");
        assert_eq!(url.query().get("q"), Some("hello world"));
        assert_eq!(url.query().get("raw%5Fkey"), None);
        assert_eq!(url.query().get("raw_key"), None);
        assert_eq!(url.query().iter().nth(1).unwrap().0, "raw%5Fkey");
    }

    #[test]
    fn invalid_escape_is_left_intact() {
        let url = Url::parse("/p?x=abc%zz");
        assert_eq!(url.query().get("x"), Some("abc%zz"));
    }

    #[test]
    fn ignore_set_preserves_quoted_separator() {
        let mut ignore = std::collections::HashSet::new();
        ignore.insert(b'&');
        let url = Url::parse_with("/p?x=a%26b", false, &ignore);
        assert_eq!(url.query().get("x"), Some("a%26b"));
    }

    #[test]
    fn absolute_url_extracts_lowercased_host() {
        let url = Url::parse("http://Example.COM/a/b?x=1");
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.path().len(), 2);
    }

    #[test]
    fn lowercase_path_option() {
        let url = Url::parse_with("/FOO/Bar", true, &HashSet::new());
        assert_eq!(&url.path()[0], "foo");
        assert_eq!(&url.path()[1], "bar");
    }
}
