use std::collections::BTreeMap;

/// Largest delta-seconds value the engine accepts. Values above this cannot
/// survive scaling to milliseconds without overflow.
pub(crate) const MAX_DELTA_SECONDS: u64 = u64::MAX / 1_000;

/// Parsed `Cache-Control` field: directive name mapped to its value, with
/// the empty string standing in for valueless directives.
///
/// A field that repeats any directive name collapses to `{"no-store": ""}`,
/// the safe reading of an ambiguous field. A field containing control bytes
/// or non-ASCII is treated as if the header were absent. The member lists
/// of `no-cache=...` and `private=...` are kept verbatim but never
/// interpreted; both directives act unqualified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    map: BTreeMap<String, String>,
}

impl Directives {
    pub fn parse(field: Option<&str>) -> Self {
        let Some(field) = field else {
            return Self::default();
        };
        match tokenize(field) {
            Some(map) => Self { map },
            None => Self::default(),
        }
    }

    fn no_store_only() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("no-store".to_string(), String::new());
        map
    }

    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// Strict delta-seconds reading of a directive value. Absent directive,
    /// malformed value, or out-of-range value all read as `None`.
    pub fn delta_seconds(&self, name: &str) -> Option<u64> {
        parse_delta_seconds(self.get(name)?)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Strict non-negative decimal integer: ASCII digits only, at least one,
/// no sign, fraction, exponent, or radix prefix. Used for every
/// delta-seconds directive and for the `Age` header.
pub fn parse_delta_seconds(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().filter(|v| *v <= MAX_DELTA_SECONDS)
}

fn acceptable_field_byte(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}

fn tokenize(field: &str) -> Option<BTreeMap<String, String>> {
    if field.bytes().any(|b| !acceptable_field_byte(b)) {
        return None;
    }

    let mut map = BTreeMap::new();
    let bytes = field.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let name_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && bytes[pos] != b',' {
            pos += 1;
        }
        let name = field[name_start..pos].trim_end().to_ascii_lowercase();

        let value = if pos < bytes.len() && bytes[pos] == b'=' {
            pos += 1;
            if pos < bytes.len() && bytes[pos] == b'"' {
                pos += 1;
                let mut value = String::new();
                while pos < bytes.len() && bytes[pos] != b'"' {
                    if bytes[pos] == b'\\' && pos + 1 < bytes.len() {
                        pos += 1;
                    }
                    value.push(bytes[pos] as char);
                    pos += 1;
                }
                // Step past the closing quote when the string is terminated.
                if pos < bytes.len() {
                    pos += 1;
                }
                value
            } else {
                let value_start = pos;
                while pos < bytes.len() && bytes[pos] != b',' {
                    pos += 1;
                }
                field[value_start..pos].trim().to_string()
            }
        } else {
            String::new()
        };

        if name.is_empty() {
            continue;
        }
        if map.insert(name, value).is_some() {
            return Some(Directives::no_store_only());
        }
    }

    Some(map)
}
