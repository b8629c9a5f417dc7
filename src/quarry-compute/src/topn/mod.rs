//! Bounded Top-N: keeps the best rows by a chain of byte-comparable keys.

mod encoder;
mod operator;

pub use encoder::{SortOrder, TopNEncoder};
pub use operator::TopNOperator;
