//! Per-segment sorted term dictionaries.

use common_error::{QuarryError, QuarryResult};

/// Sorted set of distinct byte strings; an ordinal is an index into it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dictionary {
    terms: Vec<Vec<u8>>,
}

impl Dictionary {
    /// Build from terms that must already be strictly ascending.
    pub fn from_sorted(terms: Vec<Vec<u8>>) -> QuarryResult<Self> {
        if let Some(i) = terms.windows(2).position(|w| w[0] >= w[1]) {
            return Err(QuarryError::invalid_argument(format!(
                "dictionary terms must be strictly ascending, violated at ordinal {}",
                i + 1
            )));
        }
        Ok(Self { terms })
    }

    /// Build from arbitrary terms, sorting and removing duplicates.
    pub fn from_terms<I, B>(terms: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut terms: Vec<Vec<u8>> = terms.into_iter().map(|t| t.as_ref().to_vec()).collect();
        terms.sort_unstable();
        terms.dedup();
        Self { terms }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The term for `ord`.
    pub fn lookup(&self, ord: u32) -> Option<&[u8]> {
        self.terms.get(ord as usize).map(Vec::as_slice)
    }

    /// The ordinal of `term`, if present.
    pub fn ord_of(&self, term: &[u8]) -> Option<u32> {
        self.terms
            .binary_search_by(|t| t.as_slice().cmp(term))
            .ok()
            .map(|i| i as u32)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.terms.iter().map(Vec::as_slice)
    }

    pub fn ram_bytes(&self) -> usize {
        self.terms.iter().map(|t| t.len() + 24).sum()
    }
}
