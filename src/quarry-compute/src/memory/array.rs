//! Dense arrays indexed by group id, charged against the accountant.

use std::mem::size_of;

use common_error::QuarryResult;

use super::{AccountantRef, MemoryReservation};

/// Growable array that reserves before it grows.
///
/// Growth copies into a larger buffer, preserving every written slot, and
/// the array never shrinks. New slots hold the array's default value.
#[derive(Debug)]
pub struct TrackedArray<T: Copy> {
    values: Vec<T>,
    default: T,
    reservation: MemoryReservation,
}

impl<T: Copy + Default> TrackedArray<T> {
    /// Create an empty array filled with `T::default()` on growth.
    pub fn new(accountant: AccountantRef, label: &'static str) -> Self {
        Self::with_default(accountant, label, T::default())
    }
}

impl<T: Copy> TrackedArray<T> {
    /// Create an empty array filled with `default` on growth.
    pub fn with_default(accountant: AccountantRef, label: &'static str, default: T) -> Self {
        Self {
            values: Vec::new(),
            default,
            reservation: MemoryReservation::empty(accountant, label),
        }
    }

    /// Number of addressable slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no slot has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ensure at least `min_len` slots exist.
    ///
    /// Bytes are reserved before the buffer is extended; on refusal the
    /// array is unchanged.
    pub fn grow_to(&mut self, min_len: usize) -> QuarryResult<()> {
        if min_len <= self.values.len() {
            return Ok(());
        }
        let new_len = oversize(min_len);
        let extra = (new_len - self.values.len()) * size_of::<T>();
        self.reservation.grow(extra)?;
        self.values.resize(new_len, self.default);
        Ok(())
    }

    /// Read slot `index`, or the default for slots never grown into.
    pub fn get(&self, index: usize) -> T {
        self.values.get(index).copied().unwrap_or(self.default)
    }

    /// Write slot `index`, growing first if needed.
    pub fn set(&mut self, index: usize, value: T) -> QuarryResult<()> {
        self.grow_to(index + 1)?;
        self.values[index] = value;
        Ok(())
    }

    /// Apply `f` to slot `index`, growing first if needed.
    pub fn update(&mut self, index: usize, f: impl FnOnce(T) -> T) -> QuarryResult<()> {
        self.grow_to(index + 1)?;
        self.values[index] = f(self.values[index]);
        Ok(())
    }

    /// Accounted size in bytes.
    pub fn ram_bytes(&self) -> usize {
        self.reservation.size()
    }
}

/// Over-allocate by an eighth so repeated growth stays amortized.
fn oversize(min_len: usize) -> usize {
    min_len + (min_len >> 3) + 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LimitedAccountant, MemoryAccountant};
    use std::sync::Arc;

    #[test]
    fn test_grow_preserves_slots() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::unlimited());
        let mut array: TrackedArray<i64> = TrackedArray::new(Arc::clone(&accountant), "sums");
        array.set(3, 42).unwrap();
        let before = array.len();
        array.set(1000, 7).unwrap();
        assert!(array.len() > before);
        assert_eq!(array.get(3), 42);
        assert_eq!(array.get(1000), 7);
        assert_eq!(array.get(999), 0);
        assert_eq!(accountant.used(), array.len() * 8);
    }

    #[test]
    fn test_grow_refused_leaves_array_intact() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::new(256));
        let mut array: TrackedArray<f64> = TrackedArray::with_default(Arc::clone(&accountant), "x", f64::NAN);
        array.set(5, 1.5).unwrap();
        let len = array.len();
        let used = accountant.used();

        assert!(array.grow_to(10_000).unwrap_err().is_resource_exhausted());
        assert_eq!(array.len(), len);
        assert_eq!(accountant.used(), used);
        assert_eq!(array.get(5), 1.5);
        assert!(array.get(0).is_nan());
    }

    #[test]
    fn test_never_shrinks() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::unlimited());
        let mut array: TrackedArray<u32> = TrackedArray::new(Arc::clone(&accountant), "ids");
        array.grow_to(100).unwrap();
        let len = array.len();
        array.grow_to(10).unwrap();
        assert_eq!(array.len(), len);
        drop(array);
        assert_eq!(accountant.used(), 0);
    }
}
