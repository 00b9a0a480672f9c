//! Cookie parsing and generation (spec.md §4.H, RFC 2109).
use super::headers::HeaderMap;

/// A single parsed `name=value` pair from a `Cookie` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePair {
    pub name: String,
    pub value: String,
}

/// Parses a `Cookie` header value: pairs separated by `;`, each split on
/// the first `=`. Empty pairs (stray `;;`) are dropped. Keys are
/// lowercased; values are left as-is.
pub fn parse(header_value: &str) -> Vec<CookiePair> {
    let mut pairs = Vec::new();
    for part in header_value.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, value) = match part.find('=') {
            Some(pos) => (&part[..pos], &part[pos + 1..]),
            None => (part, ""),
        };
        pairs.push(CookiePair {
            name: name.trim().to_ascii_lowercase(),
            value: value.trim().to_string(),
        });
    }
    pairs
}

/// Reserved `Set-Cookie` attribute names that never get folded into the
/// plain name/value pair list.
const RESERVED: &[&str] = &["comment", "expires", "domain", "path", "max-age", "secure", "version"];

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

/// Builds `Set-Cookie` header values. Each call to `add` stages one
/// cookie; `Secure` is valueless, and any reserved attribute left unset
/// on a cookie is simply omitted from its line rather than emitted
/// empty. The internal buffer is rebuilt on `render`, so slices handed
/// out by a prior render are not valid across a later one.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<(String, String, HeaderMap, bool)>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar { cookies: Vec::new() }
    }

    /// Starts a new `Set-Cookie` entry for `name=value`. Returns its
    /// index so attributes can be attached with `set_attribute`/`secure`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> usize {
        self.cookies.push((name.into(), value.into(), HeaderMap::new(), false));
        self.cookies.len() - 1
    }

    /// Sets a reserved attribute (`Path`, `Domain`, `Expires`, `Comment`,
    /// `Max-Age`, `Version`) on the cookie at `index`. Panics if `name`
    /// is not one of those six or `index` is out of range — both are
    /// programmer errors, not malformed input.
    pub fn set_attribute(&mut self, index: usize, name: &str, value: impl Into<String>) {
        assert!(is_reserved(name) && !name.eq_ignore_ascii_case("secure"), "not a valued reserved attribute: {}", name);
        self.cookies[index].2.insert(name, value);
    }

    pub fn set_secure(&mut self, index: usize) {
        self.cookies[index].3 = true;
    }

    /// Renders one `Set-Cookie:` line per staged cookie, in insertion
    /// order, attributes in the fixed order Comment, Domain, Path,
    /// Max-Age, Secure, Version, Expires.
    pub fn render(&self) -> Vec<String> {
        const ORDER: &[&str] = &["comment", "domain", "path", "max-age", "version", "expires"];
        self.cookies
            .iter()
            .map(|(name, value, attrs, secure)| {
                let mut line = format!("{}={}", name, value);
                for attr in ORDER {
                    if let Some(v) = attrs.get(attr) {
                        let canonical = canonical_name(attr);
                        line.push_str("; ");
                        line.push_str(canonical);
                        line.push('=');
                        line.push_str(v);
                    }
                }
                if *secure {
                    line.push_str("; Secure");
                }
                line
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

fn canonical_name(lowercase: &str) -> &'static str {
    match lowercase {
        "comment" => "Comment",
        "domain" => "Domain",
        "path" => "Path",
        "max-age" => "Max-Age",
        "version" => "Version",
        "expires" => "Expires",
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_multiple_pairs_and_drops_empties() {
        let pairs = parse("a=1; ; B=2 ;c=");
        assert_eq!(pairs, vec![
            CookiePair { name: "a".into(), value: "1".into() },
            CookiePair { name: "b".into(), value: "2".into() },
            CookiePair { name: "c".into(), value: "".into() },
        ]);
    }

    #[test]
    fn pair_without_equals_has_empty_value() {
        let pairs = parse("flagonly");
        assert_eq!(pairs, vec![CookiePair { name: "flagonly".into(), value: "".into() }]);
    }

    #[test]
    fn renders_attributes_in_fixed_order_omitting_unset() {
        let mut jar = CookieJar::new();
        let id = jar.add("session", "abc123");
        jar.set_attribute(id, "Path", "/");
        jar.set_secure(id);
        let lines = jar.render();
        assert_eq!(lines, vec!["session=abc123; Path=/; Secure"]);
    }

    #[test]
    fn multiple_cookies_render_independently() {
        let mut jar = CookieJar::new();
        jar.add("a", "1");
        let b = jar.add("b", "2");
        jar.set_attribute(b, "Domain", "example.com");
        assert_eq!(jar.render(), vec!["a=1", "b=2; Domain=example.com"]);
    }

    #[test]
    #[should_panic]
    fn secure_is_not_a_valued_attribute() {
        let mut jar = CookieJar::new();
        let id = jar.add("a", "1");
        jar.set_attribute(id, "Secure", "true");
    }
}
