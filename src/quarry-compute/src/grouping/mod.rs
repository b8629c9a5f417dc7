//! Hash grouping: assigns a dense group id to every distinct key.
//!
//! Ids are handed out in first-seen order starting at 0, so aggregator state
//! can live in arrays indexed by group id. A null key is a group of its own.
//! A multi-valued key position belongs to every group of its values; its
//! group id position holds each distinct id once.

mod bytes;
mod no_keys;
mod packed;
mod primitive;

use std::fmt;

use common_error::{QuarryError, QuarryResult};
use serde::{Deserialize, Serialize};

use crate::data::{Block, ElementType, Page};
use crate::memory::BlockFactory;

pub use bytes::BytesBlockHash;
pub use no_keys::NoKeysBlockHash;
pub use packed::PackedValuesBlockHash;
pub use primitive::{HashKey, PrimitiveBlockHash};

/// Bytes charged per distinct key, on top of the key's own payload.
pub(crate) const ENTRY_OVERHEAD: usize = 32;

/// One grouping key: the input channel and its element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub channel: usize,
    pub element_type: ElementType,
}

impl GroupSpec {
    pub fn new(channel: usize, element_type: ElementType) -> Self {
        Self { channel, element_type }
    }
}

/// Maps key rows to group ids.
pub trait BlockHash: Send + fmt::Debug {
    /// Group ids for every row of `page`, creating groups for unseen keys.
    fn add(&mut self, page: &Page) -> QuarryResult<Block>;

    /// Group ids of keys already present; null where a key was never added.
    fn lookup(&self, page: &Page) -> QuarryResult<Block>;

    /// Groups created so far.
    fn group_count(&self) -> usize;

    /// One block per key channel, position `i` holding group `i`'s key.
    fn keys(&self, factory: &BlockFactory) -> QuarryResult<Vec<Block>>;

    /// Group ids that have received at least one row.
    fn non_empty_groups(&self) -> Vec<u32> {
        (0..self.group_count() as u32).collect()
    }
}

/// Pick the hash for `specs`.
pub fn block_hash(specs: &[GroupSpec], factory: &BlockFactory) -> QuarryResult<Box<dyn BlockHash>> {
    if specs.iter().any(|s| s.element_type == ElementType::Doc) {
        return Err(QuarryError::invalid_argument("cannot group by DOC"));
    }
    Ok(match specs {
        [] => Box::new(NoKeysBlockHash::new(factory.clone())),
        [spec] => match spec.element_type {
            ElementType::Boolean => Box::new(PrimitiveBlockHash::<bool>::new(spec.channel, factory)),
            ElementType::Int => Box::new(PrimitiveBlockHash::<i32>::new(spec.channel, factory)),
            ElementType::Long => Box::new(PrimitiveBlockHash::<i64>::new(spec.channel, factory)),
            ElementType::Double => Box::new(PrimitiveBlockHash::<f64>::new(spec.channel, factory)),
            ElementType::BytesRef => Box::new(BytesBlockHash::new(spec.channel, factory)),
            _ => Box::new(PackedValuesBlockHash::new(specs.to_vec(), factory)),
        },
        _ => Box::new(PackedValuesBlockHash::new(specs.to_vec(), factory)),
    })
}

/// Build an Int block of group ids for `block`.
///
/// `id_of` receives the value index of each value, or `None` for a null
/// position, and returns the id to record, if any.
pub(crate) fn group_ids_for(
    factory: &BlockFactory,
    block: &Block,
    mut id_of: impl FnMut(Option<usize>) -> QuarryResult<Option<u32>>,
) -> QuarryResult<Block> {
    let positions = block.position_count();
    let mut builder = factory.int_builder(positions)?;
    let mut ids = Vec::new();
    for p in 0..positions {
        ids.clear();
        if block.is_null(p) {
            ids.extend(id_of(None)?);
        } else {
            let first = block.first_value_index(p);
            for i in first..first + block.value_count(p) {
                if let Some(id) = id_of(Some(i))? {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        append_ids(&mut builder, &ids)?;
    }
    builder.build()
}

pub(crate) fn append_ids(builder: &mut crate::data::PrimitiveBlockBuilder<i32>, ids: &[u32]) -> QuarryResult<()> {
    match ids {
        [] => builder.append_null(),
        [id] => builder.append_value(*id as i32),
        _ => {
            builder.begin_position_entry()?;
            for &id in ids {
                builder.append_value(id as i32)?;
            }
            builder.end_position_entry()
        }
    }
}
