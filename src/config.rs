//! Per-handler configuration (spec.md §6).
use std::collections::HashMap;

/// A method accepted by the connection handler, and whether a request
/// using it is allowed to carry a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub accepts_body: bool,
}

/// Builds the default method table: GET, HEAD, POST, PUT, DELETE,
/// OPTIONS, TRACE, CONNECT, matching spec.md §3's bounded method set.
fn default_methods() -> HashMap<&'static str, MethodSpec> {
    let mut m = HashMap::new();
    m.insert("GET", MethodSpec { accepts_body: false });
    m.insert("HEAD", MethodSpec { accepts_body: false });
    m.insert("POST", MethodSpec { accepts_body: true });
    m.insert("PUT", MethodSpec { accepts_body: true });
    m.insert("DELETE", MethodSpec { accepts_body: false });
    m.insert("OPTIONS", MethodSpec { accepts_body: true });
    m.insert("TRACE", MethodSpec { accepts_body: false });
    m.insert("CONNECT", MethodSpec { accepts_body: false });
    m
}

/// Server-wide and per-connection limits.
///
/// Defaults match spec.md §6 verbatim.
#[derive(Debug, Clone)]
pub struct Config {
    pub supported_methods: HashMap<&'static str, MethodSpec>,
    pub header_length_limit: usize,
    pub body_length_limit: usize,
    pub io_buffer_size: usize,
    pub keep_alive_max: u32,
    pub connection_idle_timeout_ms: u64,
    pub default_exception_status: u16,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            supported_methods: default_methods(),
            header_length_limit: 16384,
            body_length_limit: 2 * 1024 * 1024,
            io_buffer_size: 512,
            keep_alive_max: 0,
            connection_idle_timeout_ms: 30_000,
            default_exception_status: 500,
        }
    }
}

impl Config {
    pub fn accepts_body(&self, method: &str) -> Option<bool> {
        self.supported_methods.get(method).map(|m| m.accepts_body)
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.header_length_limit, 16384);
        assert_eq!(cfg.body_length_limit, 2 * 1024 * 1024);
        assert_eq!(cfg.keep_alive_max, 0);
        assert_eq!(cfg.accepts_body("GET"), Some(false));
        assert_eq!(cfg.accepts_body("POST"), Some(true));
        assert_eq!(cfg.accepts_body("FROB"), None);
    }
}
