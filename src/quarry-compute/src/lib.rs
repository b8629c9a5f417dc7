//! Columnar, page-at-a-time compute for Quarry.
//!
//! A query runs as one or more [`Driver`]s. Each driver pulls [`Page`]s
//! through a linear chain of [`Operator`]s: a source that yields document
//! references, a loader that attaches field values, transforms, a blocking
//! stage such as grouping or top-N, and a sink.
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌───────────┐   ┌─────────────┐   ┌──────┐
//! │ DocSource  │──▶│ ValuesReader  │──▶│ Filter/.. │──▶│ Agg / TopN  │──▶│ Sink │
//! └────────────┘   └───────────────┘   └───────────┘   └─────────────┘   └──────┘
//! ```
//!
//! # Modules
//!
//! - [`data`]: blocks, vectors, pages and builders
//! - [`memory`]: the memory accountant, tracked arrays and the block factory
//! - [`loader`]: per-segment column readers over doc values
//! - [`operator`]: the operator contract, the driver and the concrete operators
//! - [`grouping`]: block hashes that assign group ids
//! - [`aggregation`]: grouping aggregator functions and the aggregator tree
//! - [`topn`]: bounded top-N with byte-comparable keys
//!
//! Every buffer that grows with input is reserved against the
//! [`MemoryAccountant`] before it is used and released when dropped.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)] // Group ids and positions move between i32, u32 and usize
#![allow(clippy::too_many_arguments)]
#![allow(clippy::missing_errors_doc)]

pub mod aggregation;
pub mod data;
pub mod grouping;
pub mod loader;
pub mod memory;
pub mod operator;
pub mod topn;

pub use common_error::{QuarryError, QuarryResult};
pub use data::{Block, DocRef, ElementType, Page, Scalar};
pub use memory::{BlockFactory, LimitedAccountant, MemoryAccountant};
pub use operator::{Driver, DriverContext, Operator};
