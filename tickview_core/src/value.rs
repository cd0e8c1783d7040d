//! Property values - the fixed-size payload of every store slot.
//!
//! A [`PropertyValue`] is 16 bytes: one tag byte plus up to 15 payload bytes.
//! Values carry no identity and are compared by raw bit equality, so a float
//! slot holding `NaN` is "unchanged" when `NaN` with the same bits is written
//! again, and `0.0` / `-0.0` are distinct.

use serde::{Deserialize, Serialize, Serializer};
use tickview_env::EntityRef;

/// Maximum number of UTF-8 bytes a [`ShortText`] can hold.
pub const TEXT_CAPACITY: usize = 14;

/// Inline, fixed-capacity UTF-8 text.
///
/// Longer input is truncated at the last char boundary that fits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShortText {
    len: u8,
    bytes: [u8; TEXT_CAPACITY],
}

impl ShortText {
    /// Creates text from `s`, truncating to [`TEXT_CAPACITY`] bytes.
    pub fn new(s: &str) -> Self {
        let mut end = s.len().min(TEXT_CAPACITY);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; TEXT_CAPACITY];
        bytes[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self {
            len: end as u8,
            bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a &str cut on a char boundary
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for ShortText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for ShortText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ShortText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Declared type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Entity,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Entity => "entity",
        };
        f.write_str(name)
    }
}

/// Tagged union stored in every slot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub enum PropertyValue {
    /// Never written, or explicitly cleared.
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(ShortText),
    Entity(EntityRef),
}

const _: () = assert!(std::mem::size_of::<PropertyValue>() == 16);

impl PropertyValue {
    /// Convenience constructor for text values.
    pub fn text(s: &str) -> Self {
        PropertyValue::Text(ShortText::new(s))
    }

    /// Returns the value's type, or `None` for [`PropertyValue::Empty`].
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            PropertyValue::Empty => None,
            PropertyValue::Bool(_) => Some(ValueType::Bool),
            PropertyValue::Int(_) => Some(ValueType::Int),
            PropertyValue::Float(_) => Some(ValueType::Float),
            PropertyValue::Text(_) => Some(ValueType::Text),
            PropertyValue::Entity(_) => Some(ValueType::Entity),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PropertyValue::Empty)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityRef> {
        match self {
            PropertyValue::Entity(e) => Some(*e),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        use PropertyValue::*;
        match (self, other) {
            (Empty, Empty) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Text(a), Text(b)) => a == b,
            (Entity(a), Entity(b)) => a == b,
            _ => false,
        }
    }
}

// Bit equality is reflexive, NaN included.
impl Eq for PropertyValue {}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Empty => f.write_str("-"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Text(t) => write!(f, "{t:?}"),
            PropertyValue::Entity(e) => write!(f, "{e}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::text(v)
    }
}

impl From<EntityRef> for PropertyValue {
    fn from(v: EntityRef) -> Self {
        PropertyValue::Entity(v)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(PropertyValue::Empty, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_bit_equality() {
        assert_eq!(PropertyValue::Float(f64::NAN), PropertyValue::Float(f64::NAN));
        assert_ne!(PropertyValue::Float(0.0), PropertyValue::Float(-0.0));
        assert_ne!(PropertyValue::Int(1), PropertyValue::Float(1.0));
    }

    #[test]
    fn test_short_text_truncates_on_char_boundary() {
        let t = ShortText::new("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(t.as_str(), "abcdefghijklmn");
        assert_eq!(t.len(), TEXT_CAPACITY);

        // 'é' is two bytes; 13 ASCII chars + 'é' would need 15
        let t = ShortText::new("aaaaaaaaaaaaaé");
        assert_eq!(t.as_str(), "aaaaaaaaaaaaa");
    }

    #[test]
    fn test_value_types() {
        assert_eq!(PropertyValue::from(3i64).value_type(), Some(ValueType::Int));
        assert_eq!(PropertyValue::from("hi").as_text(), Some("hi"));
        assert_eq!(PropertyValue::from(None::<i64>), PropertyValue::Empty);
        assert_eq!(PropertyValue::Empty.value_type(), None);
    }
}
