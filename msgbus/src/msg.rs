//! Message tree values and structural operations

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

/// Type tag of a message node.
///
/// The declaration order defines the cross-type comparison order used by
/// [`Msg::compare`] when two nodes do not share a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MsgType {
    Null,
    Object,
    Array,
    Bool,
    Int,
    Int64,
    Double,
    Str,
    Bin,
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MsgType::Null => "null",
            MsgType::Object => "object",
            MsgType::Array => "array",
            MsgType::Bool => "bool",
            MsgType::Int => "int",
            MsgType::Int64 => "int64",
            MsgType::Double => "double",
            MsgType::Str => "string",
            MsgType::Bin => "binary",
        };
        f.write_str(s)
    }
}

/// Errors produced by message tree operations.
#[derive(Debug, Error)]
pub enum MsgError {
    #[error("expected {expected}, found {found}")]
    Type { expected: MsgType, found: MsgType },

    #[error("buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("invalid path token: {0:?}")]
    Path(String),

    #[error("malformed json: {0}")]
    Json(String),

    #[error("malformed wire payload: {0}")]
    Wire(String),
}

/// A node in the dynamic message tree.
///
/// Containers own their children: objects are insertion-ordered maps with
/// unique keys, arrays are plain sequences of unnamed values. Cloning is a
/// deep copy.
#[derive(Debug, Clone, Default)]
pub enum Msg {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Double(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Msg>),
    Object(IndexMap<String, Msg>),
}

impl Msg {
    /// Create an empty object node.
    pub fn new_object() -> Msg {
        Msg::Object(IndexMap::new())
    }

    /// Create an empty array node.
    pub fn new_array() -> Msg {
        Msg::Array(Vec::new())
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            Msg::Null => MsgType::Null,
            Msg::Bool(_) => MsgType::Bool,
            Msg::Int(_) => MsgType::Int,
            Msg::Int64(_) => MsgType::Int64,
            Msg::Double(_) => MsgType::Double,
            Msg::Str(_) => MsgType::Str,
            Msg::Bin(_) => MsgType::Bin,
            Msg::Array(_) => MsgType::Array,
            Msg::Object(_) => MsgType::Object,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Msg::Array(_) | Msg::Object(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Msg::Int(_) | Msg::Int64(_))
    }

    pub fn is_number(&self) -> bool {
        self.is_integer() || matches!(self, Msg::Double(_))
    }

    // Typed accessors. Integer accessors promote between the two integer
    // widths; everything else is strict.

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Msg::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Msg::Int(v) => Some(*v),
            Msg::Int64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Msg::Int(v) => Some(i64::from(*v)),
            Msg::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Msg::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Msg::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the binary payload. An empty buffer is a valid payload.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Msg::Bin(v) => Some(v),
            _ => None,
        }
    }

    /// Copy the string payload into a caller buffer.
    ///
    /// Fails when the node is not a string or the buffer cannot hold the
    /// payload. Returns the number of bytes written.
    pub fn copy_str_into(&self, out: &mut [u8]) -> Result<usize, MsgError> {
        let s = self.as_str().ok_or(MsgError::Type {
            expected: MsgType::Str,
            found: self.msg_type(),
        })?;
        let src = s.as_bytes();
        if out.len() < src.len() {
            return Err(MsgError::BufferTooSmall {
                need: src.len(),
                have: out.len(),
            });
        }
        out[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    /// Copy the binary payload into a caller buffer.
    pub fn copy_bytes_into(&self, out: &mut [u8]) -> Result<usize, MsgError> {
        let src = self.as_bytes().ok_or(MsgError::Type {
            expected: MsgType::Bin,
            found: self.msg_type(),
        })?;
        if out.len() < src.len() {
            return Err(MsgError::BufferTooSmall {
                need: src.len(),
                have: out.len(),
            });
        }
        out[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    /// Number of children for containers, zero otherwise.
    pub fn item_count(&self) -> usize {
        match self {
            Msg::Array(items) => items.len(),
            Msg::Object(props) => props.len(),
            _ => 0,
        }
    }

    /// Indexed child access; works on both containers so iteration code can
    /// treat them uniformly.
    pub fn item(&self, i: usize) -> Option<&Msg> {
        match self {
            Msg::Array(items) => items.get(i),
            Msg::Object(props) => props.get_index(i).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn item_mut(&mut self, i: usize) -> Option<&mut Msg> {
        match self {
            Msg::Array(items) => items.get_mut(i),
            Msg::Object(props) => props.get_index_mut(i).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Name of the i-th object property.
    pub fn prop_name(&self, i: usize) -> Option<&str> {
        match self {
            Msg::Object(props) => props.get_index(i).map(|(k, _)| k.as_str()),
            _ => None,
        }
    }

    /// Append a value to an array node. The value is consumed either way.
    pub fn push(&mut self, v: impl Into<Msg>) -> Result<&mut Msg, MsgError> {
        match self {
            Msg::Array(items) => {
                items.push(v.into());
                Ok(items.last_mut().unwrap())
            }
            other => Err(MsgError::Type {
                expected: MsgType::Array,
                found: other.msg_type(),
            }),
        }
    }

    /// Set an object property, replacing any existing value at the same
    /// insertion index. The value is consumed either way.
    pub fn set_prop(&mut self, name: &str, v: impl Into<Msg>) -> Result<&mut Msg, MsgError> {
        match self {
            Msg::Object(props) => {
                // IndexMap keeps the original slot on replace, which is
                // exactly the stable-ordering contract.
                let idx = match props.get_index_of(name) {
                    Some(idx) => {
                        props[idx] = v.into();
                        idx
                    }
                    None => props.insert_full(name.to_string(), v.into()).0,
                };
                Ok(&mut props[idx])
            }
            other => Err(MsgError::Type {
                expected: MsgType::Object,
                found: other.msg_type(),
            }),
        }
    }

    pub fn prop(&self, name: &str) -> Option<&Msg> {
        match self {
            Msg::Object(props) => props.get(name),
            _ => None,
        }
    }

    pub fn prop_mut(&mut self, name: &str) -> Option<&mut Msg> {
        match self {
            Msg::Object(props) => props.get_mut(name),
            _ => None,
        }
    }

    /// Remove a property, preserving the order of the remaining ones.
    pub fn remove_prop(&mut self, name: &str) -> Option<Msg> {
        match self {
            Msg::Object(props) => props.shift_remove(name),
            _ => None,
        }
    }

    /// Resize an array, filling new slots with nulls.
    pub fn resize(&mut self, num: usize) -> Result<(), MsgError> {
        match self {
            Msg::Array(items) => {
                items.resize_with(num, || Msg::Null);
                Ok(())
            }
            other => Err(MsgError::Type {
                expected: MsgType::Array,
                found: other.msg_type(),
            }),
        }
    }

    /// Replace the value of this node in place, consuming `src`.
    ///
    /// The node keeps its identity within its parent; only the value side
    /// moves.
    pub fn assign(&mut self, src: Msg) {
        *self = src;
    }

    /// Structural comparison.
    ///
    /// The two integer widths compare by value against each other; doubles do
    /// not participate in the promotion. Mismatched types order by type tag.
    /// Objects compare property-by-property in the left operand's order.
    pub fn compare(&self, other: &Msg) -> Ordering {
        if self.is_integer() && other.is_integer() {
            let a = self.as_int64().unwrap_or(0);
            let b = other.as_int64().unwrap_or(0);
            return a.cmp(&b);
        }
        if self.msg_type() != other.msg_type() {
            return self.msg_type().cmp(&other.msg_type());
        }
        match (self, other) {
            (Msg::Null, Msg::Null) => Ordering::Equal,
            (Msg::Bool(a), Msg::Bool(b)) => a.cmp(b),
            (Msg::Double(a), Msg::Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Less),
            (Msg::Str(a), Msg::Str(b)) => a.cmp(b),
            (Msg::Bin(a), Msg::Bin(b)) => a.cmp(b),
            (Msg::Array(a), Msg::Array(b)) => {
                if a.len() != b.len() {
                    return a.len().cmp(&b.len());
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            (Msg::Object(a), Msg::Object(b)) => {
                if a.len() != b.len() {
                    return a.len().cmp(&b.len());
                }
                for (key, x) in a.iter() {
                    match b.get(key) {
                        Some(y) => {
                            let ord = x.compare(y);
                            if ord != Ordering::Equal {
                                return ord;
                            }
                        }
                        None => return Ordering::Greater,
                    }
                }
                Ordering::Equal
            }
            _ => Ordering::Less,
        }
    }
}

impl PartialEq for Msg {
    fn eq(&self, other: &Msg) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl From<bool> for Msg {
    fn from(v: bool) -> Msg {
        Msg::Bool(v)
    }
}

impl From<i32> for Msg {
    fn from(v: i32) -> Msg {
        Msg::Int(v)
    }
}

impl From<i64> for Msg {
    fn from(v: i64) -> Msg {
        Msg::Int64(v)
    }
}

impl From<f64> for Msg {
    fn from(v: f64) -> Msg {
        Msg::Double(v)
    }
}

impl From<&str> for Msg {
    fn from(v: &str) -> Msg {
        Msg::Str(v.to_string())
    }
}

impl From<String> for Msg {
    fn from(v: String) -> Msg {
        Msg::Str(v)
    }
}

impl From<&[u8]> for Msg {
    fn from(v: &[u8]) -> Msg {
        Msg::Bin(v.to_vec())
    }
}

impl From<Vec<u8>> for Msg {
    fn from(v: Vec<u8>) -> Msg {
        Msg::Bin(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_prop_order_stable_on_replace() {
        let mut m = Msg::new_object();
        m.set_prop("a", 1).unwrap();
        m.set_prop("b", 2).unwrap();
        m.set_prop("c", 3).unwrap();
        m.set_prop("b", "replaced").unwrap();

        assert_eq!(m.prop_name(0), Some("a"));
        assert_eq!(m.prop_name(1), Some("b"));
        assert_eq!(m.prop_name(2), Some("c"));
        assert_eq!(m.prop("b").unwrap().as_str(), Some("replaced"));
    }

    #[test]
    fn test_push_rejects_non_array() {
        let mut m = Msg::new_object();
        assert!(m.push(1).is_err());

        let mut a = Msg::new_array();
        a.push(1).unwrap();
        a.push("x").unwrap();
        assert_eq!(a.item_count(), 2);
        assert_eq!(a.item(1).unwrap().as_str(), Some("x"));
    }

    #[test]
    fn test_copy_is_deep() {
        let mut m = Msg::new_object();
        m.set_prop("list", Msg::new_array()).unwrap();
        m.prop_mut("list").unwrap().push(10).unwrap();

        let mut c = m.clone();
        c.prop_mut("list").unwrap().push(20).unwrap();

        assert_eq!(m.prop("list").unwrap().item_count(), 1);
        assert_eq!(c.prop("list").unwrap().item_count(), 2);
        assert_eq!(m.compare(&c), Ordering::Less);
    }

    #[test]
    fn test_assign_preserves_identity_in_parent() {
        let mut m = Msg::new_object();
        m.set_prop("x", 1).unwrap();
        m.prop_mut("x").unwrap().assign(Msg::Str("hello".into()));
        assert_eq!(m.prop("x").unwrap().as_str(), Some("hello"));
        assert_eq!(m.prop_name(0), Some("x"));
    }

    #[test]
    fn test_assign_copy_is_idempotent() {
        let mut m = Msg::new_object();
        m.set_prop("k", Msg::Int64(42)).unwrap();
        let snapshot = m.clone();
        let copy = m.clone();
        m.assign(copy);
        assert_eq!(m, snapshot);
    }

    #[test]
    fn test_compare_integer_promotion() {
        assert_eq!(Msg::Int(5).compare(&Msg::Int64(5)), Ordering::Equal);
        assert_eq!(Msg::Int(5).compare(&Msg::Int64(6)), Ordering::Less);
        // doubles do not promote
        assert_ne!(Msg::Int(5).compare(&Msg::Double(5.0)), Ordering::Equal);
    }

    #[test]
    fn test_compare_mismatched_types_by_tag() {
        // null sorts before containers which sort before scalars
        assert_eq!(Msg::Null.compare(&Msg::Bool(false)), Ordering::Less);
        assert_eq!(Msg::new_object().compare(&Msg::new_array()), Ordering::Less);
    }

    #[test]
    fn test_fixed_buffer_accessors() {
        let m = Msg::Bin(b"abcd".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(m.copy_bytes_into(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");

        let mut small = [0u8; 2];
        assert!(matches!(
            m.copy_bytes_into(&mut small),
            Err(MsgError::BufferTooSmall { need: 4, have: 2 })
        ));

        // empty-but-valid payload
        let empty = Msg::Bin(Vec::new());
        assert_eq!(empty.as_bytes(), Some(&[][..]));
        assert_eq!(empty.copy_bytes_into(&mut small).unwrap(), 0);
    }

    #[test]
    fn test_array_resize_fills_nulls() {
        let mut a = Msg::new_array();
        a.push(1).unwrap();
        a.resize(3).unwrap();
        assert_eq!(a.item_count(), 3);
        assert_eq!(a.item(2).unwrap().msg_type(), MsgType::Null);
        a.resize(1).unwrap();
        assert_eq!(a.item_count(), 1);
    }
}
