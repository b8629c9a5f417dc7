use std::mem::size_of;
use std::sync::Arc;

use ahash::AHashMap;
use common_error::QuarryResult;

use super::{group_ids_for, BlockHash, ENTRY_OVERHEAD};
use crate::data::{Block, Page, Primitive, Values};
use crate::memory::{BlockFactory, MemoryReservation};

/// Fixed-width keys hashed by their bit pattern.
pub trait HashKey: Primitive {
    fn hash_bits(self) -> u64;
}

impl HashKey for bool {
    fn hash_bits(self) -> u64 {
        self as u64
    }
}

impl HashKey for i32 {
    fn hash_bits(self) -> u64 {
        self as u32 as u64
    }
}

impl HashKey for i64 {
    fn hash_bits(self) -> u64 {
        self as u64
    }
}

impl HashKey for f64 {
    /// `-0.0` groups with `0.0` and every NaN with every other NaN.
    fn hash_bits(self) -> u64 {
        if self == 0.0 {
            0.0f64.to_bits()
        } else if self.is_nan() {
            f64::NAN.to_bits()
        } else {
            self.to_bits()
        }
    }
}

/// Hash over a single boolean, int, long or double column.
#[derive(Debug)]
pub struct PrimitiveBlockHash<T: HashKey> {
    channel: usize,
    factory: BlockFactory,
    ids: AHashMap<u64, u32>,
    /// Key of each group, `None` for the null group.
    keys: Vec<Option<T>>,
    null_group: Option<u32>,
    reservation: MemoryReservation,
}

impl<T: HashKey> PrimitiveBlockHash<T> {
    pub fn new(channel: usize, factory: &BlockFactory) -> Self {
        Self {
            channel,
            factory: factory.clone(),
            ids: AHashMap::new(),
            keys: Vec::new(),
            null_group: None,
            reservation: MemoryReservation::empty(Arc::clone(factory.accountant()), "primitive block hash"),
        }
    }

    fn new_group(&mut self, key: Option<T>) -> QuarryResult<u32> {
        self.reservation.grow(ENTRY_OVERHEAD + size_of::<Option<T>>())?;
        let id = self.keys.len() as u32;
        self.keys.push(key);
        Ok(id)
    }

    fn add_value(&mut self, value: T) -> QuarryResult<u32> {
        let bits = value.hash_bits();
        if let Some(&id) = self.ids.get(&bits) {
            return Ok(id);
        }
        let id = self.new_group(Some(value))?;
        self.ids.insert(bits, id);
        Ok(id)
    }

    fn add_null(&mut self) -> QuarryResult<u32> {
        if let Some(id) = self.null_group {
            return Ok(id);
        }
        let id = self.new_group(None)?;
        self.null_group = Some(id);
        Ok(id)
    }
}

impl<T: HashKey> BlockHash for PrimitiveBlockHash<T> {
    fn add(&mut self, page: &Page) -> QuarryResult<Block> {
        let block = page.block(self.channel)?.clone();
        let factory = self.factory.clone();
        if matches!(block.values(), Values::Null) {
            return group_ids_for(&factory, &block, |_| self.add_null().map(Some));
        }
        let values = block.primitives::<T>()?;
        group_ids_for(&factory, &block, |index| match index {
            Some(i) => self.add_value(values.get(i)).map(Some),
            None => self.add_null().map(Some),
        })
    }

    fn lookup(&self, page: &Page) -> QuarryResult<Block> {
        let block = page.block(self.channel)?;
        if matches!(block.values(), Values::Null) {
            return group_ids_for(&self.factory, block, |_| Ok(self.null_group));
        }
        let values = block.primitives::<T>()?;
        group_ids_for(&self.factory, block, |index| {
            Ok(match index {
                Some(i) => self.ids.get(&values.get(i).hash_bits()).copied(),
                None => self.null_group,
            })
        })
    }

    fn group_count(&self) -> usize {
        self.keys.len()
    }

    fn keys(&self, factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        let mut builder = factory.primitive_builder::<T>(self.keys.len())?;
        for key in &self.keys {
            match key {
                Some(v) => builder.append_value(*v)?,
                None => builder.append_null()?,
            }
        }
        Ok(vec![builder.build()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Scalar;

    fn ids(block: &Block) -> Vec<Option<Vec<i32>>> {
        let ints = block.ints().unwrap();
        (0..block.position_count())
            .map(|p| {
                (!block.is_null(p)).then(|| {
                    let first = block.first_value_index(p);
                    (first..first + block.value_count(p)).map(|i| ints.get(i)).collect()
                })
            })
            .collect()
    }

    #[test]
    fn test_long_hash_first_seen_order() {
        let factory = BlockFactory::unlimited();
        let mut hash = PrimitiveBlockHash::<i64>::new(0, &factory);
        let mut keys = factory.long_builder(5).unwrap();
        for v in [7, 3, 7] {
            keys.append_value(v).unwrap();
        }
        keys.append_null().unwrap();
        keys.begin_position_entry().unwrap();
        keys.append_value(3).unwrap();
        keys.append_value(9).unwrap();
        keys.append_value(3).unwrap();
        keys.end_position_entry().unwrap();
        let page = Page::new(vec![keys.build().unwrap()]).unwrap();

        let groups = hash.add(&page).unwrap();
        assert_eq!(
            ids(&groups),
            vec![Some(vec![0]), Some(vec![1]), Some(vec![0]), Some(vec![2]), Some(vec![1, 3])]
        );
        assert_eq!(hash.group_count(), 4);

        let keys = hash.keys(&factory).unwrap();
        assert_eq!(keys[0].values_at(0), vec![Scalar::Long(7)]);
        assert!(keys[0].is_null(2));
        assert!(factory.accountant().used() > 0);
    }

    #[test]
    fn test_double_zero_and_nan_collapse() {
        let factory = BlockFactory::unlimited();
        let mut hash = PrimitiveBlockHash::<f64>::new(0, &factory);
        let page = Page::new(vec![factory.double_vector(vec![0.0, -0.0, f64::NAN, f64::NAN]).unwrap()]).unwrap();
        let groups = hash.add(&page).unwrap();
        assert_eq!(ids(&groups), vec![Some(vec![0]), Some(vec![0]), Some(vec![1]), Some(vec![1])]);
    }

    #[test]
    fn test_lookup_misses_are_null() {
        let factory = BlockFactory::unlimited();
        let mut hash = PrimitiveBlockHash::<i32>::new(0, &factory);
        hash.add(&Page::new(vec![factory.int_vector(vec![1, 2]).unwrap()]).unwrap())
            .unwrap();
        let probe = Page::new(vec![factory.int_vector(vec![2, 5]).unwrap()]).unwrap();
        assert_eq!(ids(&hash.lookup(&probe).unwrap()), vec![Some(vec![1]), None]);
        assert_eq!(hash.group_count(), 2);

        let wrong = Page::new(vec![factory.long_vector(vec![1]).unwrap()]).unwrap();
        assert!(hash.lookup(&wrong).unwrap_err().is_invariant_violation());
    }
}
