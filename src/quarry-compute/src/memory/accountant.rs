//! Byte accounting against a shared budget.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use common_config::{BreakerConfig, BreakerKind};
use common_error::QuarryResult;
use common_error::QuarryError;
use log::{error, trace};

/// Shared byte accountant (the "breaker").
///
/// Every growable buffer in the engine reserves its bytes here before it
/// becomes visible and releases them when it is dropped. Reservation is
/// all-or-nothing: a refused call leaves [`used`](Self::used) unchanged.
pub trait MemoryAccountant: Send + Sync + fmt::Debug {
    /// Reserve `bytes`, failing with `ResourceExhausted` past the limit.
    fn reserve(&self, bytes: usize, label: &str) -> QuarryResult<()>;

    /// Return previously reserved bytes.
    fn release(&self, bytes: usize);

    /// Bytes currently reserved.
    fn used(&self) -> usize;

    /// Budget in bytes (0 = unlimited).
    fn limit(&self) -> usize;

    /// Number of refused reservations so far.
    fn trip_count(&self) -> u64;

    /// Bytes left before the limit, `usize::MAX` when unlimited.
    fn available(&self) -> usize {
        let limit = self.limit();
        if limit == 0 {
            usize::MAX
        } else {
            limit.saturating_sub(self.used())
        }
    }

    /// Check if a reservation would succeed without actually reserving.
    fn can_reserve(&self, bytes: usize) -> bool {
        let limit = self.limit();
        limit == 0 || self.used().saturating_add(bytes) <= limit
    }
}

/// Shared handle to an accountant.
pub type AccountantRef = Arc<dyn MemoryAccountant>;

/// Atomic byte counter with an optional hard limit.
#[derive(Debug)]
pub struct LimitedAccountant {
    used: AtomicUsize,
    limit: usize,
    trips: AtomicU64,
}

impl LimitedAccountant {
    /// Create an accountant refusing reservations past `limit` bytes.
    /// A limit of 0 means unlimited.
    pub fn new(limit: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            limit,
            trips: AtomicU64::new(0),
        }
    }

    /// Track usage without ever refusing.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Build from the `breaker` section of the configuration.
    pub fn from_config(config: &BreakerConfig) -> QuarryResult<Self> {
        config.validate()?;
        Ok(match config.kind {
            BreakerKind::Unlimited => Self::unlimited(),
            BreakerKind::Limited => Self::new(config.effective_limit()),
        })
    }

    /// Usage ratio (0.0 - 1.0, or 0.0 if unlimited).
    pub fn usage_ratio(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.used() as f64 / self.limit as f64
        }
    }
}

impl Default for LimitedAccountant {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl MemoryAccountant for LimitedAccountant {
    fn reserve(&self, bytes: usize, label: &str) -> QuarryResult<()> {
        if bytes == 0 {
            return Ok(());
        }

        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let new = current.saturating_add(bytes);
            if self.limit > 0 && new > self.limit {
                self.trips.fetch_add(1, Ordering::Relaxed);
                return Err(QuarryError::resource_exhausted(
                    label, bytes, current, self.limit,
                ));
            }

            match self
                .used
                .compare_exchange_weak(current, new, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => {
                    trace!("reserved {bytes} bytes for [{label}], used={new}");
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }

        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            if bytes > current {
                error!("releasing {bytes} bytes but only {current} are reserved");
            }
            let new = current.saturating_sub(bytes);
            match self
                .used
                .compare_exchange_weak(current, new, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}

/// RAII guard for reserved bytes.
///
/// Releases whatever it still holds when dropped, so an error or panic
/// between reserve and hand-off cannot leak accounted bytes.
pub struct MemoryReservation {
    accountant: AccountantRef,
    label: &'static str,
    bytes: usize,
}

impl MemoryReservation {
    /// Reserve `bytes` up front.
    pub fn try_new(accountant: AccountantRef, bytes: usize, label: &'static str) -> QuarryResult<Self> {
        accountant.reserve(bytes, label)?;
        Ok(Self {
            accountant,
            label,
            bytes,
        })
    }

    /// A zero-sized reservation that can grow later.
    pub fn empty(accountant: AccountantRef, label: &'static str) -> Self {
        Self {
            accountant,
            label,
            bytes: 0,
        }
    }

    /// Get the reserved size.
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Label reported on refusal.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The accountant backing this reservation.
    pub fn accountant(&self) -> &AccountantRef {
        &self.accountant
    }

    /// Grow the reservation by additional bytes.
    pub fn grow(&mut self, additional: usize) -> QuarryResult<()> {
        self.accountant.reserve(additional, self.label)?;
        self.bytes += additional;
        Ok(())
    }

    /// Shrink the reservation.
    pub fn shrink(&mut self, amount: usize) {
        let release = amount.min(self.bytes);
        self.accountant.release(release);
        self.bytes -= release;
    }

    /// Grow or shrink to exactly `size` bytes.
    pub fn resize_to(&mut self, size: usize) -> QuarryResult<()> {
        if size > self.bytes {
            self.grow(size - self.bytes)
        } else {
            self.shrink(self.bytes - size);
            Ok(())
        }
    }

    /// Move up to `bytes` into a new guard. The accountant is not touched.
    pub fn split_off(&mut self, bytes: usize) -> Self {
        let moved = bytes.min(self.bytes);
        self.bytes -= moved;
        Self {
            accountant: Arc::clone(&self.accountant),
            label: self.label,
            bytes: moved,
        }
    }

    /// Release all reserved memory now.
    pub fn free(mut self) {
        self.accountant.release(self.bytes);
        self.bytes = 0;
    }
}

impl fmt::Debug for MemoryReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryReservation")
            .field("label", &self.label)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.accountant.release(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limited_accountant() {
        let accountant = LimitedAccountant::new(1000);

        assert!(accountant.reserve(500, "a").is_ok());
        assert!(accountant.reserve(400, "b").is_ok());
        assert_eq!(accountant.used(), 900);

        let err = accountant.reserve(200, "c").unwrap_err();
        assert!(err.is_resource_exhausted());
        assert_eq!(accountant.used(), 900);
        assert_eq!(accountant.trip_count(), 1);

        accountant.release(400);
        assert_eq!(accountant.used(), 500);
        assert_eq!(accountant.available(), 500);
    }

    #[test]
    fn test_unlimited_never_trips() {
        let accountant = LimitedAccountant::unlimited();
        assert!(accountant.reserve(usize::MAX / 2, "huge").is_ok());
        assert_eq!(accountant.limit(), 0);
        assert_eq!(accountant.available(), usize::MAX);
        assert_eq!(accountant.trip_count(), 0);
    }

    #[test]
    fn test_over_release_saturates() {
        let accountant = LimitedAccountant::new(100);
        accountant.reserve(10, "x").unwrap();
        accountant.release(50);
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn test_from_config() {
        let limited = LimitedAccountant::from_config(&BreakerConfig::limited(64)).unwrap();
        assert_eq!(limited.limit(), 64);
        let unlimited = LimitedAccountant::from_config(&BreakerConfig::default()).unwrap();
        assert_eq!(unlimited.limit(), 0);

        let no_budget = BreakerConfig {
            kind: BreakerKind::Limited,
            limit_bytes: None,
        };
        assert!(LimitedAccountant::from_config(&no_budget).is_err());
    }

    #[test]
    fn test_reservation_released_on_drop() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::new(1000));
        {
            let reservation = MemoryReservation::try_new(Arc::clone(&accountant), 500, "r").unwrap();
            assert_eq!(reservation.size(), 500);
            assert_eq!(accountant.used(), 500);
        }
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn test_reservation_resize_and_split() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::new(1000));
        let mut reservation = MemoryReservation::empty(Arc::clone(&accountant), "r");
        reservation.resize_to(300).unwrap();
        assert_eq!(accountant.used(), 300);
        reservation.resize_to(100).unwrap();
        assert_eq!(accountant.used(), 100);

        let split = reservation.split_off(40);
        assert_eq!(split.size(), 40);
        assert_eq!(reservation.size(), 60);
        assert_eq!(accountant.used(), 100);
        drop(split);
        assert_eq!(accountant.used(), 60);

        assert!(reservation.resize_to(2000).is_err());
        assert_eq!(reservation.size(), 60);
        reservation.free();
        assert_eq!(accountant.used(), 0);
    }
}
