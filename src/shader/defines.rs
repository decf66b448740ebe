//! Shader Macro Definitions
//!
//! [`DefineList`] holds the macro set a shader compiles with. Entries are
//! kept sorted by key, so two lists built in different insertion orders
//! serialize identically and produce the same cache key.

/// An ordered collection of `NAME=value` shader macros.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefineList {
    // Sorted by key; binary search keeps insertion O(log n) + shift.
    defines: Vec<(String, i32)>,
}

impl DefineList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a macro, replacing any existing value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: i32) {
        let key = key.into();
        match self.defines.binary_search_by(|(k, _)| k.as_str().cmp(&key)) {
            Ok(index) => self.defines[index].1 = value,
            Err(index) => self.defines.insert(index, (key, value)),
        }
    }

    /// Sets a flag-style macro to 1.
    pub fn enable(&mut self, key: impl Into<String>) {
        self.set(key, 1);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<i32> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|index| self.defines[index].1)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes a macro; returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(index) => {
                self.defines.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    pub fn clear(&mut self) {
        self.defines.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Merges `other` into `self`; values from `other` win on conflict.
    pub fn merge(&mut self, other: &DefineList) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Canonical serialized form, `#KEY=VALUE` per entry in key order.
    /// Identical macro sets always serialize identically.
    #[must_use]
    pub fn to_string_canonical(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (key, value) in &self.defines {
            let _ = write!(out, "#{key}={value}");
        }
        out
    }

    /// Parses `IDENT=INT` items out of `source` (any separators between
    /// items are skipped) and inserts them. Returns how many were parsed.
    pub fn parse(&mut self, source: &str) -> usize {
        let mut count = 0;
        let mut rest = source;
        while let Some(eq) = rest.find('=') {
            // Identifier runs back from '='.
            let key_start = rest[..eq]
                .rfind(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .map_or(0, |i| i + 1);
            let key = &rest[key_start..eq];

            let value_end = rest[eq + 1..]
                .find(|c: char| !c.is_ascii_digit() && c != '-')
                .map_or(rest.len(), |i| eq + 1 + i);
            let value = &rest[eq + 1..value_end];

            if is_identifier(key) {
                if let Ok(value) = value.parse::<i32>() {
                    self.set(key, value);
                    count += 1;
                }
            }
            rest = &rest[value_end.max(eq + 1)..];
        }
        count
    }
}

impl std::fmt::Display for DefineList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_canonical())
    }
}

impl From<&[(&str, i32)]> for DefineList {
    fn from(items: &[(&str, i32)]) -> Self {
        let mut list = Self::new();
        for &(key, value) in items {
            list.set(key, value);
        }
        list
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut defines = DefineList::new();
        defines.enable("USE_NORMAL_MAP");
        defines.set("LIGHT_COUNT", 4);

        assert_eq!(defines.get("USE_NORMAL_MAP"), Some(1));
        assert_eq!(defines.get("LIGHT_COUNT"), Some(4));
        assert_eq!(defines.get("MISSING"), None);

        defines.set("LIGHT_COUNT", 8);
        assert_eq!(defines.get("LIGHT_COUNT"), Some(8));
        assert_eq!(defines.len(), 2);
    }

    #[test]
    fn test_canonical_form_ignores_insertion_order() {
        let mut a = DefineList::new();
        a.set("B", 2);
        a.set("A", 1);
        a.set("C", 3);

        let mut b = DefineList::new();
        b.set("C", 3);
        b.set("A", 1);
        b.set("B", 2);

        assert_eq!(a.to_string_canonical(), b.to_string_canonical());
        assert_eq!(a.to_string_canonical(), "#A=1#B=2#C=3");
        assert_eq!(a, b);
    }

    #[test]
    fn test_remove() {
        let mut defines = DefineList::new();
        defines.set("A", 1);
        assert!(defines.remove("A"));
        assert!(!defines.remove("A"));
        assert!(defines.is_empty());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = DefineList::from(&[("A", 1), ("B", 2)][..]);
        let patch = DefineList::from(&[("B", 3), ("C", 4)][..]);
        base.merge(&patch);

        assert_eq!(base.get("A"), Some(1));
        assert_eq!(base.get("B"), Some(3));
        assert_eq!(base.get("C"), Some(4));
    }

    #[test]
    fn test_parse_round_trip() {
        let mut defines = DefineList::new();
        defines.set("MAX_BONES", 64);
        defines.set("USE_SKINNING", 1);
        let serialized = defines.to_string_canonical();

        let mut parsed = DefineList::new();
        assert_eq!(parsed.parse(&serialized), 2);
        assert_eq!(parsed, defines);
    }

    #[test]
    fn test_parse_skips_malformed_items() {
        let mut defines = DefineList::new();
        let count = defines.parse("FOO=1 2BAD=2 BAR=xyz BAZ=-3");
        assert_eq!(count, 2);
        assert_eq!(defines.get("FOO"), Some(1));
        assert_eq!(defines.get("BAZ"), Some(-3));
        assert!(!defines.contains("2BAD"));
        assert!(!defines.contains("BAR"));
    }
}
