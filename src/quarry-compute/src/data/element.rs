//! Element types and single dynamically typed values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The element type of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Boolean,
    Int,
    Long,
    Double,
    /// Variable-length byte strings, plain or dictionary encoded.
    BytesRef,
    /// Document references produced by sources.
    Doc,
    /// Every position is null.
    Null,
}

impl ElementType {
    /// Fixed width of one value in bytes, `None` for variable-width types.
    pub fn value_width(self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            Self::Int => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::Doc => Some(12),
            Self::Null => Some(0),
            Self::BytesRef => None,
        }
    }

    /// Whether numeric aggregations accept this type without coercion.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Double)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::Int => "INT",
            Self::Long => "LONG",
            Self::Double => "DOUBLE",
            Self::BytesRef => "BYTES_REF",
            Self::Doc => "DOC",
            Self::Null => "NULL",
        };
        f.write_str(name)
    }
}

/// A reference to one document in one segment of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DocRef {
    pub shard: u32,
    pub segment: u32,
    pub doc: u32,
}

impl DocRef {
    pub fn new(shard: u32, segment: u32, doc: u32) -> Self {
        Self { shard, segment, doc }
    }
}

/// A single value of any element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Doc(DocRef),
}

impl Scalar {
    /// The element type a block holding this value would have.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Null => ElementType::Null,
            Self::Boolean(_) => ElementType::Boolean,
            Self::Int(_) => ElementType::Int,
            Self::Long(_) => ElementType::Long,
            Self::Double(_) => ElementType::Double,
            Self::Bytes(_) => ElementType::BytesRef,
            Self::Doc(_) => ElementType::Doc,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integral value, widening ints.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value as a double.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(f64::from(*v)),
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Self::Doc(d) => write!(f, "[{}:{}:{}]", d.shard, d.segment, d.doc),
        }
    }
}
