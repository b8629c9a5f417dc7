use std::sync::Arc;

use ahash::AHashMap;
use common_error::QuarryResult;

use super::{group_ids_for, BlockHash, ENTRY_OVERHEAD};
use crate::data::{Block, Dictionary, Page, Values};
use crate::memory::{BlockFactory, MemoryReservation};

/// Group ids already resolved for the ordinals of one dictionary.
#[derive(Debug)]
struct OrdinalRemap {
    dictionary: Arc<Dictionary>,
    ids: Vec<Option<u32>>,
}

/// Hash over a single BytesRef column.
///
/// Dictionary-encoded input hashes each distinct ordinal once per
/// dictionary instead of once per row.
#[derive(Debug)]
pub struct BytesBlockHash {
    channel: usize,
    factory: BlockFactory,
    ids: AHashMap<Vec<u8>, u32>,
    keys: Vec<Option<Vec<u8>>>,
    null_group: Option<u32>,
    remap: Option<OrdinalRemap>,
    reservation: MemoryReservation,
}

impl BytesBlockHash {
    pub fn new(channel: usize, factory: &BlockFactory) -> Self {
        Self {
            channel,
            factory: factory.clone(),
            ids: AHashMap::new(),
            keys: Vec::new(),
            null_group: None,
            remap: None,
            reservation: MemoryReservation::empty(Arc::clone(factory.accountant()), "bytes block hash"),
        }
    }

    fn add_bytes(&mut self, value: &[u8]) -> QuarryResult<u32> {
        if let Some(&id) = self.ids.get(value) {
            return Ok(id);
        }
        // Stored twice: map key and key list.
        self.reservation.grow(ENTRY_OVERHEAD + 2 * value.len())?;
        let id = self.keys.len() as u32;
        self.keys.push(Some(value.to_vec()));
        self.ids.insert(value.to_vec(), id);
        Ok(id)
    }

    fn add_null(&mut self) -> QuarryResult<u32> {
        if let Some(id) = self.null_group {
            return Ok(id);
        }
        self.reservation.grow(ENTRY_OVERHEAD)?;
        let id = self.keys.len() as u32;
        self.keys.push(None);
        self.null_group = Some(id);
        Ok(id)
    }

    fn take_remap(&mut self, dictionary: &Arc<Dictionary>) -> OrdinalRemap {
        match self.remap.take() {
            Some(remap) if Arc::ptr_eq(&remap.dictionary, dictionary) => remap,
            _ => OrdinalRemap {
                dictionary: Arc::clone(dictionary),
                ids: vec![None; dictionary.len()],
            },
        }
    }
}

impl BlockHash for BytesBlockHash {
    fn add(&mut self, page: &Page) -> QuarryResult<Block> {
        let block = page.block(self.channel)?.clone();
        let factory = self.factory.clone();
        if matches!(block.values(), Values::Null) {
            return group_ids_for(&factory, &block, |_| self.add_null().map(Some));
        }
        let bytes = block.bytes()?;
        if let Some(ordinals) = bytes.ordinals() {
            let mut remap = self.take_remap(ordinals.dictionary());
            let ids = group_ids_for(&factory, &block, |index| match index {
                Some(i) => {
                    let ord = ordinals.ord(i) as usize;
                    if let Some(id) = remap.ids[ord] {
                        return Ok(Some(id));
                    }
                    let id = self.add_bytes(ordinals.term(i))?;
                    remap.ids[ord] = Some(id);
                    Ok(Some(id))
                }
                None => self.add_null().map(Some),
            });
            self.remap = Some(remap);
            return ids;
        }
        group_ids_for(&factory, &block, |index| match index {
            Some(i) => self.add_bytes(bytes.get(i)).map(Some),
            None => self.add_null().map(Some),
        })
    }

    fn lookup(&self, page: &Page) -> QuarryResult<Block> {
        let block = page.block(self.channel)?;
        if matches!(block.values(), Values::Null) {
            return group_ids_for(&self.factory, block, |_| Ok(self.null_group));
        }
        let bytes = block.bytes()?;
        group_ids_for(&self.factory, block, |index| {
            Ok(match index {
                Some(i) => self.ids.get(bytes.get(i)).copied(),
                None => self.null_group,
            })
        })
    }

    fn group_count(&self) -> usize {
        self.keys.len()
    }

    fn keys(&self, factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        let mut builder = factory.bytes_builder(self.keys.len())?;
        for key in &self.keys {
            match key {
                Some(v) => builder.append_value(v)?,
                None => builder.append_null()?,
            }
        }
        Ok(vec![builder.build()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_ids(block: &Block) -> Vec<i32> {
        let ints = block.ints().unwrap();
        (0..block.position_count()).map(|p| ints.get(block.first_value_index(p))).collect()
    }

    #[test]
    fn test_plain_and_ordinal_input_share_groups() {
        let factory = BlockFactory::unlimited();
        let mut hash = BytesBlockHash::new(0, &factory);
        let plain = Page::new(vec![factory.bytes_vector(["b", "a", "b"]).unwrap()]).unwrap();
        assert_eq!(single_ids(&hash.add(&plain).unwrap()), vec![0, 1, 0]);

        let dictionary = Arc::new(Dictionary::from_terms(["a", "c"]));
        let ords = factory.ordinals_vector(vec![1, 0, 1], Arc::clone(&dictionary)).unwrap();
        let page = Page::new(vec![ords]).unwrap();
        assert_eq!(single_ids(&hash.add(&page).unwrap()), vec![2, 1, 2]);
        assert_eq!(hash.remap.as_ref().map(|r| r.ids.clone()), Some(vec![Some(1), Some(2)]));
        assert_eq!(hash.group_count(), 3);

        let keys = hash.keys(&factory).unwrap();
        let terms = keys[0].bytes().unwrap();
        assert_eq!(terms.get(2), b"c");
    }

    #[test]
    fn test_null_key_is_its_own_group() {
        let factory = BlockFactory::unlimited();
        let mut hash = BytesBlockHash::new(0, &factory);
        let mut builder = factory.bytes_builder(3).unwrap();
        builder.append_null().unwrap();
        builder.append_value(b"x").unwrap();
        builder.append_null().unwrap();
        let page = Page::new(vec![builder.build().unwrap()]).unwrap();
        assert_eq!(single_ids(&hash.add(&page).unwrap()), vec![0, 1, 0]);
        assert!(hash.keys(&factory).unwrap()[0].is_null(0));
    }
}
