// ChainTester - IPC test harness for EOSIO chain debuggers
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Order-preserving JSON trees for debugger responses.
//!
//! The debugger answers most control calls with JSON documents. Chain values such
//! as 64-bit amounts or names are frequently wider than an `f64`, so leaves keep
//! their literal text exactly as received. Objects keep their key order so that a
//! value can be re-serialized byte-for-byte in the same shape.
//!
//! Values are navigated with heterogeneous paths of keys and indices:
//!
//! ```rust,ignore
//! use chaintester::{json_path, JsonValue};
//!
//! let rows = JsonValue::parse(br#"{"rows":[{"count":"18446744073709551615"}]}"#)?;
//! assert_eq!(rows.get_u64(json_path!["rows", 0, "count"])?, u64::MAX);
//! ```

use std::{borrow::Cow, fmt, str::FromStr};

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use thiserror::Error;

/// Timestamp layout used by the chain for block and head times
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Errors produced while parsing or traversing a [`JsonValue`]
#[derive(Debug, Error)]
pub enum JsonError {
    /// Input is not valid JSON
    #[error("failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A lookup was attempted with no keys
    #[error("no key specified")]
    EmptyPath,

    /// An object does not contain the key
    #[error("key {key:?} not found at {path}")]
    KeyNotFound {
        /// Missing key
        key: String,
        /// Location of the object
        path: String,
    },

    /// A list is shorter than the index
    #[error("index {index} out of range for list of length {len} at {path}")]
    IndexOutOfRange {
        /// Requested index
        index: i64,
        /// Actual list length
        len: usize,
        /// Location of the list
        path: String,
    },

    /// The value has a different shape than the lookup expects
    #[error("expected {expected} at {path}, found {found}")]
    TypeMismatch {
        /// Expected shape
        expected: &'static str,
        /// Actual shape
        found: &'static str,
        /// Location of the value
        path: String,
    },

    /// A leaf could not be converted to the requested type
    #[error("invalid value {value:?} at {path}: {reason}")]
    InvalidValue {
        /// Leaf text
        value: String,
        /// Location of the leaf
        path: String,
        /// Conversion failure
        reason: String,
    },
}

/// One step of a [`JsonValue`] lookup path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKey<'a> {
    /// Object member
    Key(Cow<'a, str>),
    /// List element; negative indices never match
    Index(i64),
}

impl<'a> From<&'a str> for PathKey<'a> {
    fn from(key: &'a str) -> Self {
        Self::Key(Cow::Borrowed(key))
    }
}

impl<'a> From<&'a String> for PathKey<'a> {
    fn from(key: &'a String) -> Self {
        Self::Key(Cow::Borrowed(key.as_str()))
    }
}

impl From<String> for PathKey<'_> {
    fn from(key: String) -> Self {
        Self::Key(Cow::Owned(key))
    }
}

impl From<usize> for PathKey<'_> {
    fn from(index: usize) -> Self {
        Self::Index(i64::try_from(index).unwrap_or(i64::MAX))
    }
}

impl From<i32> for PathKey<'_> {
    fn from(index: i32) -> Self {
        Self::Index(i64::from(index))
    }
}

impl fmt::Display for PathKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, ".{key}"),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Build a lookup path from mixed keys and indices.
///
/// `json_path!["rows", 0, "count"]` expands to an array of [`PathKey`]s.
#[macro_export]
macro_rules! json_path {
    ($($key:expr),* $(,)?) => {
        [$($crate::json::PathKey::from($key)),*]
    };
}

/// A JSON document whose leaves keep their literal text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonValue {
    /// String, number, boolean or null exactly as written (strings keep their quotes)
    Leaf(String),
    /// Ordered list
    List(Vec<JsonValue>),
    /// Object with member order preserved
    Map(IndexMap<String, JsonValue>),
}

impl JsonValue {
    /// Parse a JSON document
    pub fn parse(input: impl AsRef<[u8]>) -> Result<Self, JsonError> {
        let value: serde_json::Value = serde_json::from_slice(input.as_ref())?;
        Ok(Self::from(value))
    }

    /// Serialize back to compact JSON text
    pub fn to_json_string(&self) -> String {
        let mut out = String::new();
        self.write_json(&mut out);
        out
    }

    fn write_json(&self, out: &mut String) {
        match self {
            Self::Leaf(raw) => out.push_str(raw),
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_json(out);
                }
                out.push(']');
            }
            Self::Map(members) => {
                out.push('{');
                for (i, (key, value)) in members.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(key));
                    out.push(':');
                    value.write_json(out);
                }
                out.push('}');
            }
        }
    }

    /// Follow a path of keys and indices.
    pub fn get<'k, P>(&self, path: P) -> Result<&Self, JsonError>
    where
        P: IntoIterator<Item = PathKey<'k>>,
    {
        let mut current = self;
        let mut location = String::from("$");
        let mut steps = 0usize;

        for key in path {
            steps += 1;
            current = match (&key, current) {
                (PathKey::Key(name), Self::Map(members)) => {
                    let name: &str = name;
                    members.get(name).ok_or_else(|| JsonError::KeyNotFound {
                        key: name.to_string(),
                        path: location.clone(),
                    })?
                }
                (PathKey::Index(index), Self::List(items)) => usize::try_from(*index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or_else(|| JsonError::IndexOutOfRange {
                        index: *index,
                        len: items.len(),
                        path: location.clone(),
                    })?,
                (PathKey::Key(_), other) => {
                    return Err(JsonError::TypeMismatch {
                        expected: "object",
                        found: other.kind(),
                        path: location,
                    })
                }
                (PathKey::Index(_), other) => {
                    return Err(JsonError::TypeMismatch {
                        expected: "list",
                        found: other.kind(),
                        path: location,
                    })
                }
            };
            location.push_str(&key.to_string());
        }

        if steps == 0 {
            return Err(JsonError::EmptyPath);
        }
        Ok(current)
    }

    /// Text at a path: string leaves are unquoted, other leaves are returned
    /// verbatim and lists or objects are re-serialized.
    pub fn get_string<'k, P>(&self, path: P) -> Result<String, JsonError>
    where
        P: IntoIterator<Item = PathKey<'k>>,
    {
        let value = self.get(path)?;
        match value.as_str() {
            Some(text) => Ok(text.into_owned()),
            None => Ok(value.to_json_string()),
        }
    }

    /// Unsigned integer at a path; quoted numbers are accepted
    pub fn get_u64<'k, P>(&self, path: P) -> Result<u64, JsonError>
    where
        P: IntoIterator<Item = PathKey<'k>>,
    {
        self.parse_leaf(path, "unsigned integer", |text| text.parse::<u64>().map_err(|e| e.to_string()))
    }

    /// Signed integer at a path; quoted numbers are accepted
    pub fn get_i64<'k, P>(&self, path: P) -> Result<i64, JsonError>
    where
        P: IntoIterator<Item = PathKey<'k>>,
    {
        self.parse_leaf(path, "integer", |text| text.parse::<i64>().map_err(|e| e.to_string()))
    }

    /// Chain timestamp at a path, e.g. `2018-06-01T12:00:00.000`
    pub fn get_time<'k, P>(&self, path: P) -> Result<NaiveDateTime, JsonError>
    where
        P: IntoIterator<Item = PathKey<'k>>,
    {
        self.parse_leaf(path, "timestamp", |text| {
            NaiveDateTime::parse_from_str(text, TIME_FORMAT).map_err(|e| e.to_string())
        })
    }

    fn parse_leaf<'k, P, T, F>(&self, path: P, expected: &'static str, convert: F) -> Result<T, JsonError>
    where
        P: IntoIterator<Item = PathKey<'k>>,
        F: FnOnce(&str) -> Result<T, String>,
    {
        let keys: Vec<PathKey<'k>> = path.into_iter().collect();
        let location = render_path(&keys);
        let value = self.get(keys)?;
        let text = value.as_str().ok_or_else(|| JsonError::TypeMismatch {
            expected,
            found: value.kind(),
            path: location.clone(),
        })?;
        convert(&text).map_err(|reason| JsonError::InvalidValue {
            value: text.into_owned(),
            path: location,
            reason,
        })
    }

    /// Leaf text with string quotes removed; `None` for lists and objects
    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        let Self::Leaf(raw) = self else {
            return None;
        };
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            let inner = &raw[1..raw.len() - 1];
            if !inner.contains('\\') {
                return Some(Cow::Borrowed(inner));
            }
            return Some(match serde_json::from_str::<String>(raw) {
                Ok(unescaped) => Cow::Owned(unescaped),
                Err(_) => Cow::Borrowed(inner),
            });
        }
        Some(Cow::Borrowed(raw))
    }

    /// Elements of a list
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Members of an object
    pub fn as_map(&self) -> Option<&IndexMap<String, Self>> {
        match self {
            Self::Map(members) => Some(members),
            _ => None,
        }
    }

    /// Whether this is an object containing `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.as_map().is_some_and(|members| members.contains_key(key))
    }

    /// Whether this is a `null` leaf
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Leaf(raw) if raw == "null")
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Leaf(raw) if raw.starts_with('"') => "string",
            Self::Leaf(_) => "scalar",
            Self::List(_) => "list",
            Self::Map(_) => "object",
        }
    }
}

fn quote(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

fn render_path(keys: &[PathKey<'_>]) -> String {
    keys.iter().fold(String::from("$"), |mut acc, key| {
        acc.push_str(&key.to_string());
        acc
    })
}

impl From<serde_json::Value> for JsonValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Leaf("null".to_string()),
            Value::Bool(b) => Self::Leaf(b.to_string()),
            // arbitrary_precision keeps the literal digits
            Value::Number(n) => Self::Leaf(n.to_string()),
            Value::String(s) => Self::Leaf(quote(&s)),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(members) => {
                Self::Map(members.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

impl FromStr for JsonValue {
    type Err = JsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
