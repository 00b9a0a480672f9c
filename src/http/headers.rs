//! Ordered, case-insensitive header map shared by requests and
//! responses (spec.md §3: "mapping from lowercase header name ... to the
//! raw value string; preserves first-insertion uniqueness; case-
//! insensitive lookup; supports `key in headers` test").
//!
//! Implemented as a flat `Vec` rather than a `HashMap` since header
//! counts are small (bounded by `MAX_HEADERS_NUM`) and insertion order
//! needs to survive for response serialization.

#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap { entries: Vec::new() }
    }

    /// Stores `value` under `name`'s lowercased, trimmed form. A repeat
    /// insertion of the same name overwrites the value in place (last
    /// write wins, per spec.md §4.F) without disturbing its position.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let key = normalize(name);
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Appends `value` under `name` as a new entry regardless of any
    /// existing entry with the same name — the multi-value escape hatch
    /// for headers like `Set-Cookie` that legally repeat on the wire
    /// (spec.md §4.I step 4), where `insert`'s single-valued overwrite
    /// semantics would silently drop all but the last one.
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((normalize(name), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let key = normalize(name);
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let key = normalize(name);
        let idx = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
