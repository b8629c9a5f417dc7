use std::sync::Arc;

use ahash::AHashMap;
use common_error::QuarryResult;

use super::{append_ids, BlockHash, GroupSpec, HashKey, ENTRY_OVERHEAD};
use crate::data::{type_mismatch, Block, ElementType, Page, Scalar};
use crate::memory::{BlockFactory, MemoryReservation};

/// Hash over any number of key columns of any element type.
///
/// Each row's keys are packed into one byte string. A row with
/// multi-valued keys joins the group of every combination of its values.
#[derive(Debug)]
pub struct PackedValuesBlockHash {
    specs: Vec<GroupSpec>,
    factory: BlockFactory,
    ids: AHashMap<Vec<u8>, u32>,
    keys: Vec<Vec<Scalar>>,
    reservation: MemoryReservation,
}

impl PackedValuesBlockHash {
    pub fn new(specs: Vec<GroupSpec>, factory: &BlockFactory) -> Self {
        Self {
            specs,
            factory: factory.clone(),
            ids: AHashMap::new(),
            keys: Vec::new(),
            reservation: MemoryReservation::empty(Arc::clone(factory.accountant()), "packed block hash"),
        }
    }

    fn key_blocks<'a>(&self, page: &'a Page) -> QuarryResult<Vec<&'a Block>> {
        self.specs
            .iter()
            .map(|spec| {
                let block = page.block(spec.channel)?;
                let actual = block.element_type();
                if actual != spec.element_type && actual != ElementType::Null {
                    return Err(type_mismatch(spec.element_type, actual));
                }
                Ok(block)
            })
            .collect()
    }

    /// Every key combination of row `position`, with its packed encoding.
    fn combinations(blocks: &[&Block], position: usize) -> Vec<(Vec<u8>, Vec<Scalar>)> {
        let mut rows: Vec<(Vec<u8>, Vec<Scalar>)> = vec![(Vec::new(), Vec::new())];
        for block in blocks {
            let mut values = block.values_at(position);
            if values.is_empty() {
                values.push(Scalar::Null);
            }
            rows = rows
                .into_iter()
                .flat_map(|(packed, keys)| {
                    values.iter().map(move |value| {
                        let mut packed = packed.clone();
                        encode(value, &mut packed);
                        let mut keys = keys.clone();
                        keys.push(value.clone());
                        (packed, keys)
                    })
                })
                .collect();
        }
        rows
    }
}

fn encode(value: &Scalar, out: &mut Vec<u8>) {
    match value {
        Scalar::Null => out.push(0),
        Scalar::Boolean(v) => out.extend([1, *v as u8]),
        Scalar::Int(v) => {
            out.push(2);
            out.extend(v.to_le_bytes());
        }
        Scalar::Long(v) => {
            out.push(3);
            out.extend(v.to_le_bytes());
        }
        Scalar::Double(v) => {
            out.push(4);
            out.extend(v.hash_bits().to_le_bytes());
        }
        Scalar::Bytes(v) => {
            out.push(5);
            out.extend((v.len() as u32).to_le_bytes());
            out.extend_from_slice(v);
        }
        Scalar::Doc(d) => {
            out.push(6);
            for part in [d.shard, d.segment, d.doc] {
                out.extend(part.to_le_bytes());
            }
        }
    }
}

impl BlockHash for PackedValuesBlockHash {
    fn add(&mut self, page: &Page) -> QuarryResult<Block> {
        let blocks = self.key_blocks(page)?;
        let mut builder = self.factory.int_builder(page.position_count())?;
        let mut ids = Vec::new();
        for p in 0..page.position_count() {
            ids.clear();
            for (packed, keys) in Self::combinations(&blocks, p) {
                let id = match self.ids.get(&packed) {
                    Some(&id) => id,
                    None => {
                        self.reservation.grow(ENTRY_OVERHEAD + 2 * packed.len())?;
                        let id = self.keys.len() as u32;
                        self.keys.push(keys);
                        self.ids.insert(packed, id);
                        id
                    }
                };
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            append_ids(&mut builder, &ids)?;
        }
        builder.build()
    }

    fn lookup(&self, page: &Page) -> QuarryResult<Block> {
        let blocks = self.key_blocks(page)?;
        let mut builder = self.factory.int_builder(page.position_count())?;
        let mut ids = Vec::new();
        for p in 0..page.position_count() {
            ids.clear();
            for (packed, _) in Self::combinations(&blocks, p) {
                if let Some(&id) = self.ids.get(&packed) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            append_ids(&mut builder, &ids)?;
        }
        builder.build()
    }

    fn group_count(&self) -> usize {
        self.keys.len()
    }

    fn keys(&self, factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        self.specs
            .iter()
            .enumerate()
            .map(|(column, spec)| {
                let mut builder = factory.builder(spec.element_type, self.keys.len())?;
                for key in &self.keys {
                    builder.append_scalar(&key[column])?;
                }
                builder.build()
            })
            .collect()
    }
}
