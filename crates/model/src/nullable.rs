use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A wire field that may be absent, explicitly null, or carry a value.
///
/// Use with `#[serde(default, skip_serializing_if = "Nullable::is_absent")]`
/// so that absent fields are omitted on encode and restored as `Absent` on decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Nullable<T> {
    Absent,
    Null,
    Value(T),
}

impl<T> Nullable<T> {
    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, Nullable::Absent)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Nullable::Null)
    }

    /// True only when a value is present
    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, Nullable::Value(_))
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Nullable::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Nullable::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> Default for Nullable<T> {
    fn default() -> Self {
        Nullable::Absent
    }
}

impl<T> From<T> for Nullable<T> {
    fn from(value: T) -> Self {
        Nullable::Value(value)
    }
}

impl<T> From<Option<T>> for Nullable<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Nullable::Value(v),
            None => Nullable::Null,
        }
    }
}

impl<T: Serialize> Serialize for Nullable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Only reached when the field is not annotated with skip_serializing_if
            Nullable::Absent | Nullable::Null => serializer.serialize_none(),
            Nullable::Value(v) => serializer.serialize_some(v),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Nullable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Nullable::from)
    }
}
