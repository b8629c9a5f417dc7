//! Pages: equal-length sequences of blocks.

use common_error::{QuarryError, QuarryResult};

use super::Block;
use crate::memory::BlockFactory;

/// A batch of rows as one block per channel.
///
/// Every block has the page's position count. Dropping a page releases its
/// references to the blocks.
#[derive(Debug, Clone)]
pub struct Page {
    position_count: usize,
    blocks: Vec<Block>,
}

impl Page {
    /// Build a page from at least one block of equal position count.
    pub fn new(blocks: Vec<Block>) -> QuarryResult<Self> {
        let position_count = blocks
            .first()
            .map(Block::position_count)
            .ok_or_else(|| QuarryError::invalid_argument("a page needs at least one block"))?;
        Self::with_position_count(position_count, blocks)
    }

    /// Build a page with an explicit position count, which may have no blocks.
    pub fn with_position_count(position_count: usize, blocks: Vec<Block>) -> QuarryResult<Self> {
        if let Some((channel, block)) = blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.position_count() != position_count)
        {
            return Err(QuarryError::invalid_argument(format!(
                "block {channel} has {} positions, page has {position_count}",
                block.position_count()
            )));
        }
        Ok(Self {
            position_count,
            blocks,
        })
    }

    pub fn position_count(&self) -> usize {
        self.position_count
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, channel: usize) -> QuarryResult<&Block> {
        self.blocks.get(channel).ok_or_else(|| {
            QuarryError::invalid_argument(format!(
                "channel {channel} out of range for page of {} blocks",
                self.blocks.len()
            ))
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// This page with `block` appended as the last channel.
    pub fn append_block(mut self, block: Block) -> QuarryResult<Self> {
        if block.position_count() != self.position_count {
            return Err(QuarryError::invalid_argument(format!(
                "appended block has {} positions, page has {}",
                block.position_count(),
                self.position_count
            )));
        }
        self.blocks.push(block);
        Ok(self)
    }

    /// A page holding only `channels`, in that order.
    pub fn project(&self, channels: &[usize]) -> QuarryResult<Self> {
        let blocks = channels
            .iter()
            .map(|&c| self.block(c).cloned())
            .collect::<QuarryResult<Vec<_>>>()?;
        Self::with_position_count(self.position_count, blocks)
    }

    /// A page holding `positions` of every block.
    pub fn filter(&self, positions: &[usize], factory: &BlockFactory) -> QuarryResult<Self> {
        let blocks = self
            .blocks
            .iter()
            .map(|b| b.filter(positions, factory))
            .collect::<QuarryResult<Vec<_>>>()?;
        Self::with_position_count(positions.len(), blocks)
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Drop every block reference held by this page.
    pub fn release(self) {
        drop(self.blocks);
    }

    pub fn ram_bytes(&self) -> usize {
        self.blocks.iter().map(Block::ram_bytes).sum()
    }
}
