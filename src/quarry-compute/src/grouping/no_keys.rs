use common_error::QuarryResult;

use super::BlockHash;
use crate::data::{Block, Page};
use crate::memory::BlockFactory;

/// Puts every row in group 0.
#[derive(Debug)]
pub struct NoKeysBlockHash {
    factory: BlockFactory,
}

impl NoKeysBlockHash {
    pub fn new(factory: BlockFactory) -> Self {
        Self { factory }
    }
}

impl BlockHash for NoKeysBlockHash {
    fn add(&mut self, page: &Page) -> QuarryResult<Block> {
        self.factory.constant_int(0, page.position_count())
    }

    fn lookup(&self, page: &Page) -> QuarryResult<Block> {
        self.factory.constant_int(0, page.position_count())
    }

    fn group_count(&self) -> usize {
        1
    }

    fn keys(&self, _factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        Ok(Vec::new())
    }
}
