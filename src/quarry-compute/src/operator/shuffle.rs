//! Row shuffling, used to check that downstream operators do not depend on
//! doc order.

use common_error::QuarryResult;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{not_accepting, Operator};
use crate::data::Page;
use crate::memory::BlockFactory;

/// Permutes the rows of every page with a seeded generator.
#[derive(Debug)]
pub struct ShuffleDocsOperator {
    rng: StdRng,
    factory: BlockFactory,
    pending: Option<Page>,
    finished: bool,
}

impl ShuffleDocsOperator {
    pub fn new(seed: u64, factory: BlockFactory) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            factory,
            pending: None,
            finished: false,
        }
    }
}

impl Operator for ShuffleDocsOperator {
    fn name(&self) -> &'static str {
        "ShuffleDocsOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished && self.pending.is_none()
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if !self.needs_input() {
            return Err(not_accepting(self.name()));
        }
        self.pending = Some(page);
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished && self.pending.is_none()
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        let Some(page) = self.pending.take() else {
            return Ok(None);
        };
        let mut positions: Vec<usize> = (0..page.position_count()).collect();
        positions.shuffle(&mut self.rng);
        let shuffled = page.filter(&positions, &self.factory)?;
        page.release();
        Ok(Some(shuffled))
    }

    fn close(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shuffle_once(seed: u64) -> Vec<i64> {
        let factory = BlockFactory::unlimited();
        let mut op = ShuffleDocsOperator::new(seed, factory.clone());
        let page = Page::new(vec![factory.long_vector((0..50).collect()).unwrap()]).unwrap();
        op.add_input(page).unwrap();
        let out = op.get_output().unwrap().unwrap();
        let longs = out.block(0).unwrap().longs().unwrap();
        (0..out.position_count()).map(|p| longs.get(p)).collect()
    }

    #[test]
    fn test_shuffle_is_a_seeded_permutation() {
        let first = shuffle_once(7);
        assert_eq!(first, shuffle_once(7));
        assert_ne!(first, (0..50).collect::<Vec<_>>());
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }
}
