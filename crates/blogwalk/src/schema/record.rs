// ABOUTME: Record tree produced by evaluating a schema against a document.
// ABOUTME: Mirrors the schema shape and serializes to JSON with absent values as null.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// The value produced by evaluating an [`Evaluable`](super::Evaluable).
///
/// `Field` yields `Absent` or `Scalar`, `Group` yields `List`, `Composite`
/// yields `Object` with keys in child registration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Record {
    #[default]
    Absent,
    Scalar(String),
    List(Vec<Record>),
    Object(Vec<(String, Record)>),
}

static ABSENT: Record = Record::Absent;

impl Record {
    pub fn is_absent(&self) -> bool {
        matches!(self, Record::Absent)
    }

    /// The scalar value, if this is a `Scalar`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Record::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// List items; empty for anything that is not a `List`.
    pub fn as_list(&self) -> &[Record] {
        match self {
            Record::List(items) => items,
            _ => &[],
        }
    }

    /// Named child of an `Object`, or `Absent`.
    pub fn get(&self, name: &str) -> &Record {
        match self {
            Record::Object(fields) => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value)
                .unwrap_or(&ABSENT),
            _ => &ABSENT,
        }
    }

    /// Follows a dotted path of object keys, e.g. `"pager.next"`.
    pub fn path(&self, dotted: &str) -> &Record {
        dotted
            .split('.')
            .filter(|segment| !segment.is_empty())
            .fold(self, |record, segment| record.get(segment))
    }

    /// Owned copy of the scalar value.
    pub fn to_owned_string(&self) -> Option<String> {
        self.as_str().map(str::to_owned)
    }

    /// Object keys in registration order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Record::Object(fields) => fields.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Record::Absent => serializer.serialize_none(),
            Record::Scalar(s) => serializer.serialize_str(s),
            Record::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Record::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
