//! Hash lookup of input rows against an in-memory table.

use common_error::{QuarryError, QuarryResult};

use super::{not_accepting, Operator};
use crate::data::{Block, Page};
use crate::grouping::{block_hash, BlockHash, GroupSpec, NoKeysBlockHash};
use crate::memory::BlockFactory;

/// Appends, for each input row, the table row index of its key, or null
/// when the key is not in the table.
#[derive(Debug)]
pub struct RowInTableLookupOperator {
    factory: BlockFactory,
    hash: Box<dyn BlockHash>,
    key_channels: Vec<usize>,
    pending: Option<Page>,
    finished: bool,
}

impl RowInTableLookupOperator {
    /// `table_keys` holds one block per key column; every table row must
    /// have a distinct single-valued key.
    pub fn new(factory: BlockFactory, table_keys: Vec<Block>, key_channels: Vec<usize>) -> QuarryResult<Self> {
        if table_keys.len() != key_channels.len() {
            return Err(QuarryError::invalid_argument(format!(
                "{} key columns but {} key channels",
                table_keys.len(),
                key_channels.len()
            )));
        }
        let specs: Vec<GroupSpec> = table_keys
            .iter()
            .enumerate()
            .map(|(channel, block)| GroupSpec::new(channel, block.element_type()))
            .collect();
        let mut hash = block_hash(&specs, &factory)?;
        let table = Page::new(table_keys)?;
        let ids = hash.add(&table)?;
        let id_values = ids.ints()?;
        for row in 0..table.position_count() {
            let unique = ids.value_count(row) == 1 && id_values.get(ids.first_value_index(row)) == row as i32;
            if !unique {
                return Err(QuarryError::invalid_argument(format!(
                    "lookup table keys must be unique and single-valued, row {row} is not"
                )));
            }
        }
        Ok(Self {
            factory,
            hash,
            key_channels,
            pending: None,
            finished: false,
        })
    }

    fn lookup(&self, page: Page) -> QuarryResult<Page> {
        let keys = page.project(&self.key_channels)?;
        let rows = self.hash.lookup(&keys)?;
        page.append_block(rows)
    }
}

impl Operator for RowInTableLookupOperator {
    fn name(&self) -> &'static str {
        "RowInTableLookupOperator"
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
        match self.pending.take() {
            Some(page) => self.lookup(page).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.pending = None;
        self.hash = Box::new(NoKeysBlockHash::new(self.factory.clone()));
    }

    fn display(&self) -> String {
        format!(
            "RowInTableLookupOperator[keys = {}, channels = {:?}]",
            self.hash.group_count(),
            self.key_channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Scalar;

    fn primes_below(n: i64) -> Vec<i64> {
        (2..n).filter(|&k| (2..k).take_while(|d| d * d <= k).all(|d| k % d != 0)).collect()
    }

    #[test]
    fn test_primes_lookup() {
        let factory = BlockFactory::unlimited();
        let table = factory.long_vector(primes_below(100)).unwrap();
        let mut op = RowInTableLookupOperator::new(factory.clone(), vec![table], vec![0]).unwrap();
        op.add_input(Page::new(vec![factory.long_vector(vec![4, 17, 4, 100]).unwrap()]).unwrap())
            .unwrap();
        let out = op.get_output().unwrap().unwrap();
        let rows = out.block(1).unwrap();
        assert!(rows.is_null(0));
        assert_eq!(rows.values_at(1), vec![Scalar::Int(6)]);
        assert!(rows.is_null(2));
        assert!(rows.is_null(3));
    }

    #[test]
    fn test_duplicate_table_keys_rejected() {
        let factory = BlockFactory::unlimited();
        let table = factory.bytes_vector(["a", "b", "a"]).unwrap();
        let err = RowInTableLookupOperator::new(factory, vec![table], vec![0]).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }
}
