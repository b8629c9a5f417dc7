//! Memory accounting.
//!
//! A single [`MemoryAccountant`] is shared by every driver of a query. Blocks,
//! hash tables, aggregation state and top-N buffers all reserve through it;
//! releases happen through [`MemoryReservation`] guards on drop.

mod accountant;
mod array;
mod factory;

pub use accountant::{AccountantRef, LimitedAccountant, MemoryAccountant, MemoryReservation};
pub use array::TrackedArray;
pub use factory::BlockFactory;
