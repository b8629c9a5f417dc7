//! Error types and result aliases for Quarry.
//!
//! Every crate in the workspace reports failures through [`QuarryError`].
//! The kinds that callers must be able to tell apart (resource exhaustion,
//! invariant violations, per-value coercion failures, cancellation) are
//! dedicated variants rather than message prefixes.

mod error;

pub use error::{QuarryError, QuarryResult};
