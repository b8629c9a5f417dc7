//! Byte-comparable sort key encoding.

use common_error::{QuarryError, QuarryResult};
use serde::{Deserialize, Serialize};

use crate::data::{ElementType, Scalar};
use crate::loader::double_to_sortable_long;

const NULLS_FIRST: u8 = 0x00;
const NON_NULL: u8 = 0x01;
const NULLS_LAST: u8 = 0x02;

/// How one channel's values are turned into comparable bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopNEncoder {
    /// Numbers, booleans, bytes and doc references in natural order.
    DefaultSortable,
    /// Byte strings that must be valid UTF-8.
    Utf8,
    /// Carried through as payload; never a sort key.
    Unsortable,
}

impl TopNEncoder {
    pub fn is_sortable(self) -> bool {
        !matches!(self, Self::Unsortable)
    }

    /// Append the ascending encoding of `value` to `out`.
    pub fn encode(self, value: &Scalar, out: &mut Vec<u8>) -> QuarryResult<()> {
        match (self, value) {
            (Self::Unsortable, _) => Err(QuarryError::invariant("unsortable encoder used as a sort key")),
            (_, Scalar::Null) => Err(QuarryError::invariant("null has no value encoding")),
            (Self::Utf8, Scalar::Bytes(b)) => {
                std::str::from_utf8(b).map_err(|e| QuarryError::invariant(format!("sort key is not UTF-8: {e}")))?;
                encode_bytes(b, out);
                Ok(())
            }
            (Self::Utf8, other) => Err(QuarryError::invariant(format!(
                "UTF-8 encoder given a {} value",
                other.element_type()
            ))),
            (Self::DefaultSortable, Scalar::Boolean(v)) => {
                out.push(u8::from(*v));
                Ok(())
            }
            (Self::DefaultSortable, Scalar::Int(v)) => {
                out.extend_from_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes());
                Ok(())
            }
            (Self::DefaultSortable, Scalar::Long(v)) => {
                encode_long(*v, out);
                Ok(())
            }
            (Self::DefaultSortable, Scalar::Double(v)) => {
                encode_long(double_to_sortable_long(*v), out);
                Ok(())
            }
            (Self::DefaultSortable, Scalar::Bytes(b)) => {
                encode_bytes(b, out);
                Ok(())
            }
            (Self::DefaultSortable, Scalar::Doc(d)) => {
                for part in [d.shard, d.segment, d.doc] {
                    out.extend_from_slice(&part.to_be_bytes());
                }
                Ok(())
            }
        }
    }

    /// Whether this encoder accepts values of `element_type`.
    pub fn supports(self, element_type: ElementType) -> bool {
        match self {
            Self::Utf8 => matches!(element_type, ElementType::BytesRef | ElementType::Null),
            Self::DefaultSortable | Self::Unsortable => true,
        }
    }
}

fn encode_long(value: i64, out: &mut Vec<u8>) {
    out.extend_from_slice(&((value as u64) ^ (1 << 63)).to_be_bytes());
}

/// Zero bytes are escaped as `00 FF` and the value ends in `00 00`, so no
/// encoding is a prefix of another.
fn encode_bytes(value: &[u8], out: &mut Vec<u8>) {
    for &b in value {
        out.push(b);
        if b == 0 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

/// Ordering of one key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub channel: usize,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortOrder {
    pub fn new(channel: usize, ascending: bool, nulls_first: bool) -> Self {
        Self {
            channel,
            ascending,
            nulls_first,
        }
    }

    /// Append the key for one position holding `values` (empty when null).
    ///
    /// A multi-valued position sorts by its smallest value when ascending
    /// and its largest when descending.
    pub fn encode_key(&self, encoder: TopNEncoder, values: &[Scalar], out: &mut Vec<u8>) -> QuarryResult<()> {
        let mut best: Option<Vec<u8>> = None;
        for value in values.iter().filter(|v| !matches!(v, Scalar::Null)) {
            let mut encoded = Vec::new();
            encoder.encode(value, &mut encoded)?;
            let better = match &best {
                None => true,
                Some(current) if self.ascending => encoded < *current,
                Some(current) => encoded > *current,
            };
            if better {
                best = Some(encoded);
            }
        }
        match best {
            None => out.push(if self.nulls_first { NULLS_FIRST } else { NULLS_LAST }),
            Some(encoded) => {
                out.push(NON_NULL);
                if self.ascending {
                    out.extend_from_slice(&encoded);
                } else {
                    out.extend(encoded.iter().map(|b| !b));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SortOrder[channel={}, asc={}, nullsFirst={}]",
            self.channel, self.ascending, self.nulls_first
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(order: SortOrder, encoder: TopNEncoder, values: &[Scalar]) -> Vec<u8> {
        let mut out = Vec::new();
        order.encode_key(encoder, values, &mut out).unwrap();
        out
    }

    #[test]
    fn test_numbers_sort_as_bytes() {
        let asc = SortOrder::new(0, true, false);
        let longs = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        let keys: Vec<_> = longs
            .iter()
            .map(|&v| key(asc, TopNEncoder::DefaultSortable, &[Scalar::Long(v)]))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let doubles = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 3.0, f64::INFINITY];
        let keys: Vec<_> = doubles
            .iter()
            .map(|&v| key(asc, TopNEncoder::DefaultSortable, &[Scalar::Double(v)]))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let ints = [i32::MIN, -1, 0, 7];
        let keys: Vec<_> = ints
            .iter()
            .map(|&v| key(asc, TopNEncoder::DefaultSortable, &[Scalar::Int(v)]))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bytes_prefix_and_zero_escape() {
        let asc = SortOrder::new(0, true, false);
        let desc = SortOrder::new(0, false, false);
        let terms: [&[u8]; 5] = [b"", b"a", b"a\0", b"a\0b", b"ab"];
        let ascending: Vec<_> = terms
            .iter()
            .map(|t| key(asc, TopNEncoder::DefaultSortable, &[Scalar::Bytes(t.to_vec())]))
            .collect();
        assert!(ascending.windows(2).all(|w| w[0] < w[1]));
        let descending: Vec<_> = terms
            .iter()
            .map(|t| key(desc, TopNEncoder::DefaultSortable, &[Scalar::Bytes(t.to_vec())]))
            .collect();
        assert!(descending.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_nulls_placement_ignores_direction() {
        let value = [Scalar::Long(i64::MIN)];
        for ascending in [true, false] {
            let first = SortOrder::new(0, ascending, true);
            assert!(key(first, TopNEncoder::DefaultSortable, &[]) < key(first, TopNEncoder::DefaultSortable, &value));
            let last = SortOrder::new(0, ascending, false);
            assert!(key(last, TopNEncoder::DefaultSortable, &[]) > key(last, TopNEncoder::DefaultSortable, &value));
        }
    }

    #[test]
    fn test_multivalued_uses_best_value() {
        let values = [Scalar::Long(5), Scalar::Long(-3), Scalar::Long(9)];
        let asc = SortOrder::new(0, true, true);
        assert_eq!(
            key(asc, TopNEncoder::DefaultSortable, &values),
            key(asc, TopNEncoder::DefaultSortable, &[Scalar::Long(-3)])
        );
        let desc = SortOrder::new(0, false, true);
        assert_eq!(
            key(desc, TopNEncoder::DefaultSortable, &values),
            key(desc, TopNEncoder::DefaultSortable, &[Scalar::Long(9)])
        );
    }

    #[test]
    fn test_utf8_validates_and_unsortable_rejects() {
        let asc = SortOrder::new(0, true, true);
        let mut out = Vec::new();
        let err = asc
            .encode_key(TopNEncoder::Utf8, &[Scalar::Bytes(vec![0xC3, 0x28])], &mut out)
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(asc
            .encode_key(TopNEncoder::Unsortable, &[Scalar::Long(1)], &mut out)
            .is_err());
        assert!(!TopNEncoder::Utf8.supports(ElementType::Long));
    }
}
