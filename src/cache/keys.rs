//! Query parameter maps and their canonical cache keys.
//!
//! Cache correctness hinges on [`canonicalize`]: two parameter maps holding
//! the same present entries must produce the same key no matter how they were
//! built, otherwise every hit silently turns into a miss.

use std::fmt;

use serde_json::Value;

/// Parameter name that distinguishes pages of one logical query.
pub const PAGE_PARAM: &str = "page";

/// Scalar query parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            ParamValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            ParamValue::Text(_) => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ParamValue::Int(value) => Value::from(*value),
            ParamValue::Text(text) => Value::from(text.as_str()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

/// Insertion-ordered parameter map. Keys may be present with no value, which
/// behaves as if the key were missing everywhere except [`ParamMap::len`].
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    entries: Vec<(String, Option<ParamValue>)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, keeping the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.set(key.into(), Some(value.into()));
    }

    /// Insert or replace with an optional value; `None` records the key as absent.
    pub fn insert_opt<V: Into<ParamValue>>(&mut self, key: impl Into<String>, value: Option<V>) {
        self.set(key.into(), value.map(Into::into));
    }

    fn set(&mut self, key: String, value: Option<ParamValue>) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        self.entries.remove(index).1
    }

    /// Number of keys, absent ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that carry a value, in insertion order.
    pub fn present(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|value| (key.as_str(), value)))
    }

    /// Present entries as sorted string pairs for a URL query string.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .present()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Present entries as a JSON object with sorted keys.
    pub fn to_json_object(&self) -> Value {
        Value::Object(
            self.present()
                .map(|(key, value)| (key.to_string(), value.to_json()))
                .collect(),
        )
    }
}

/// Canonical string form of a parameter map.
///
/// Absent values are dropped, keys are sorted lexicographically and the
/// remaining pairs are serialized as a JSON array of `[key, value]` tuples.
pub fn canonicalize(params: &ParamMap) -> String {
    canonicalize_without(params, &[])
}

/// Canonical form ignoring the given keys.
pub fn canonicalize_without(params: &ParamMap, excluded: &[&str]) -> String {
    let mut entries: Vec<(&str, &ParamValue)> = params
        .present()
        .filter(|(key, _)| !excluded.contains(key))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    Value::Array(
        entries
            .into_iter()
            .map(|(key, value)| Value::Array(vec![Value::from(key), value.to_json()]))
            .collect(),
    )
    .to_string()
}

/// Response cache key: collection name plus canonical parameters.
pub fn cache_key(collection: &str, params: &ParamMap) -> String {
    format!("{collection}:{}", canonicalize(params))
}

/// Key shared by every page of one logical query.
pub fn logical_query_key(collection: &str, params: &ParamMap) -> String {
    format!("{collection}:{}", canonicalize_without(params, &[PAGE_PARAM]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(&'static str, ParamValue)> {
        vec![
            ("per_page", ParamValue::Int(12)),
            ("page", ParamValue::Int(2)),
            ("orderby", ParamValue::from("date")),
            ("categories", ParamValue::from("3,7")),
            ("meta_query", ParamValue::from(r#"{"groups":[]}"#)),
        ]
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for index in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(index);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn canonical_form_ignores_insertion_order() {
        let orders = permutations(&sample_entries());
        assert_eq!(orders.len(), 120);

        let expected = {
            let mut params = ParamMap::new();
            for (key, value) in sample_entries() {
                params.insert(key, value);
            }
            canonicalize(&params)
        };

        for order in orders {
            let mut params = ParamMap::new();
            for (key, value) in order {
                params.insert(key, value);
            }
            assert_eq!(canonicalize(&params), expected);
        }
    }

    #[test]
    fn absent_values_do_not_affect_key() {
        let base = ParamMap::new().with("page", 1u32).with("order", "desc");

        let mut with_absent = ParamMap::new();
        with_absent.insert_opt::<ParamValue>("search", None);
        with_absent.insert("order", "desc");
        with_absent.insert_opt::<ParamValue>("after", None);
        with_absent.insert("page", 1u32);

        assert_eq!(canonicalize(&base), canonicalize(&with_absent));
        assert_eq!(with_absent.len(), 4);
    }

    #[test]
    fn canonical_form_is_sorted_json_pairs() {
        let params = ParamMap::new().with("page", 1u32).with("categories", "3,7");
        assert_eq!(canonicalize(&params), r#"[["categories","3,7"],["page",1]]"#);
    }

    #[test]
    fn int_and_text_values_are_distinct() {
        let int = ParamMap::new().with("page", 1u32);
        let text = ParamMap::new().with("page", "1");
        assert_ne!(canonicalize(&int), canonicalize(&text));
    }

    #[test]
    fn logical_key_ignores_page() {
        let first = ParamMap::new().with("page", 1u32).with("per_page", 12u32);
        let second = ParamMap::new().with("per_page", 12u32).with("page", 2u32);

        assert_ne!(cache_key("posts", &first), cache_key("posts", &second));
        assert_eq!(
            logical_query_key("posts", &first),
            logical_query_key("posts", &second)
        );
        assert_ne!(
            logical_query_key("posts", &first),
            logical_query_key("products", &first)
        );
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut params = ParamMap::new().with("page", 1u32).with("order", "asc");
        params.insert("page", 3u32);
        assert_eq!(params.get("page"), Some(&ParamValue::Int(3)));
        assert_eq!(params.len(), 2);

        params.insert_opt::<ParamValue>("page", None);
        assert!(!params.contains("page"));
        assert_eq!(params.remove("order"), Some(ParamValue::from("asc")));
    }

    #[test]
    fn query_pairs_are_sorted_and_skip_absent() {
        let mut params = ParamMap::new().with("per_page", 12u32).with("categories", "3");
        params.insert_opt::<ParamValue>("search", None);
        assert_eq!(
            params.to_query_pairs(),
            vec![
                ("categories".to_string(), "3".to_string()),
                ("per_page".to_string(), "12".to_string()),
            ]
        );
    }
}
