//! Quarry - columnar, pull-based compute engine.
//!
//! Quarry executes query plans page at a time: drivers pull pages of typed
//! blocks through chains of operators that load columns, group, aggregate
//! and keep the top rows.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

// Re-export workspace crates
pub use common_config as config;
pub use common_display as display;
pub use common_error as error;
pub use common_runtime as runtime;
pub use quarry_compute as compute;

/// Quarry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
