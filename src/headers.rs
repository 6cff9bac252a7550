use std::collections::BTreeMap;

use http::HeaderMap;

/// A header field value as supplied by a mapping-style caller. Lists are
/// joined on `","` during normalization; absent entries are omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Int(u64),
    List(Vec<String>),
    Absent,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        FieldValue::List(values)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        FieldValue::List(values.into_iter().map(|v| v.to_string()).collect())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => FieldValue::Absent,
        }
    }
}

/// Case-insensitive snapshot of a header section. Names are ASCII
/// case-folded, multi-valued fields are joined on `","`, and the result is
/// stable under repeated normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderView {
    fields: BTreeMap<String, String>,
}

impl HeaderView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a view from a lookup-style header section.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut fields = BTreeMap::new();
        for name in map.keys() {
            let mut joined = String::new();
            for value in map.get_all(name) {
                let Ok(value) = value.to_str() else {
                    continue;
                };
                if !joined.is_empty() {
                    joined.push(',');
                }
                joined.push_str(value);
            }
            fields.insert(name.as_str().to_ascii_lowercase(), joined);
        }
        Self { fields }
    }

    /// Build a view from a mapping-style header section. Scalars and
    /// integers are coerced to text, list values are joined on `","`, and
    /// absent entries are dropped.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut fields = BTreeMap::new();
        for (name, value) in pairs {
            let coerced = match value.into() {
                FieldValue::Text(text) => text,
                FieldValue::Int(number) => number.to_string(),
                FieldValue::List(values) => values.join(","),
                FieldValue::Absent => continue,
            };
            fields.insert(name.as_ref().to_ascii_lowercase(), coerced);
        }
        Self { fields }
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<&HeaderMap> for HeaderView {
    fn from(map: &HeaderMap) -> Self {
        Self::from_header_map(map)
    }
}

const HOP_BY_HOP: [&str; 4] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authentication-info",
];

fn connection_tokens(value: Option<&str>, tokens: &mut Vec<String>) {
    let Some(value) = value else {
        return;
    };
    for token in value.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        tokens.push(trimmed.to_ascii_lowercase());
    }
}

/// Remove hop-by-hop fields from a response header section: the fixed set
/// plus every field nominated by the response's own `Connection` value and
/// by the request's `Connection` value.
pub fn strip_hop_by_hop(
    response: &HeaderView,
    request_connection: Option<&str>,
) -> Vec<(String, String)> {
    let mut nominated = Vec::new();
    connection_tokens(response.get("connection"), &mut nominated);
    connection_tokens(request_connection, &mut nominated);

    response
        .iter()
        .filter(|(name, _)| {
            !HOP_BY_HOP.contains(name) && !nominated.iter().any(|token| token == name)
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
