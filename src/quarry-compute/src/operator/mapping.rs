//! Page-at-a-time transforms: eval-style mapping and filtering.

use std::fmt;

use common_error::{QuarryError, QuarryResult};

use super::{not_accepting, Operator};
use crate::data::{ElementType, Page};
use crate::memory::BlockFactory;

/// A function from one page to another.
pub trait PageMapper: Send {
    fn map(&mut self, page: Page) -> QuarryResult<Page>;
}

impl<F> PageMapper for F
where
    F: FnMut(Page) -> QuarryResult<Page> + Send,
{
    fn map(&mut self, page: Page) -> QuarryResult<Page> {
        self(page)
    }
}

/// Applies a [`PageMapper`] to every page, holding at most one page.
pub struct MappingOperator {
    name: &'static str,
    mapper: Box<dyn PageMapper>,
    pending: Option<Page>,
    finished: bool,
}

impl MappingOperator {
    pub fn new(name: &'static str, mapper: impl PageMapper + 'static) -> Self {
        Self {
            name,
            mapper: Box::new(mapper),
            pending: None,
            finished: false,
        }
    }
}

impl fmt::Debug for MappingOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingOperator")
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Operator for MappingOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn needs_input(&self) -> bool {
        !self.finished && self.pending.is_none()
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if !self.needs_input() {
            return Err(not_accepting(self.name));
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
            Some(page) => self.mapper.map(page).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.pending = None;
    }
}

/// Keeps rows whose boolean `channel` is true; null and multi-valued
/// predicates drop the row.
#[derive(Debug)]
pub struct FilterOperator {
    channel: usize,
    factory: BlockFactory,
    pending: Option<Page>,
    finished: bool,
}

impl FilterOperator {
    pub fn new(channel: usize, factory: BlockFactory) -> Self {
        Self {
            channel,
            factory,
            pending: None,
            finished: false,
        }
    }

    fn filter(&self, page: Page) -> QuarryResult<Page> {
        let predicate = page.block(self.channel)?;
        if predicate.element_type() != ElementType::Boolean {
            return Err(QuarryError::invariant(format!(
                "filter channel {} is {}, expected BOOLEAN",
                self.channel,
                predicate.element_type()
            )));
        }
        let values = predicate.booleans()?;
        let positions: Vec<usize> = (0..page.position_count())
            .filter(|&p| predicate.value_count(p) == 1 && values.get(predicate.first_value_index(p)))
            .collect();
        if positions.len() == page.position_count() {
            return Ok(page);
        }
        let filtered = page.filter(&positions, &self.factory)?;
        page.release();
        Ok(filtered)
    }
}

impl Operator for FilterOperator {
    fn name(&self) -> &'static str {
        "FilterOperator"
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
            Some(page) => self.filter(page).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.pending = None;
    }

    fn display(&self) -> String {
        format!("FilterOperator[channel = {}]", self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_appends_block() {
        let factory = BlockFactory::unlimited();
        let f = factory.clone();
        let mut op = MappingOperator::new("double", move |page: Page| {
            let longs = page.block(0)?.longs()?.clone();
            let doubled: Vec<i64> = (0..page.position_count()).map(|p| longs.get(p) * 2).collect();
            page.append_block(f.long_vector(doubled)?)
        });
        op.add_input(Page::new(vec![factory.long_vector(vec![1, 2]).unwrap()]).unwrap())
            .unwrap();
        let out = op.get_output().unwrap().unwrap();
        assert_eq!(out.block(1).unwrap().longs().unwrap().get(1), 4);
        op.finish();
        assert!(op.is_finished());
    }

    #[test]
    fn test_filter_drops_false_and_null() {
        let factory = BlockFactory::unlimited();
        let mut predicate = factory.boolean_builder(4).unwrap();
        predicate.append_value(true).unwrap();
        predicate.append_value(false).unwrap();
        predicate.append_null().unwrap();
        predicate.append_value(true).unwrap();
        let page = Page::new(vec![
            factory.long_vector(vec![10, 20, 30, 40]).unwrap(),
            predicate.build().unwrap(),
        ])
        .unwrap();

        let mut filter = FilterOperator::new(1, factory.clone());
        filter.add_input(page).unwrap();
        let out = filter.get_output().unwrap().unwrap();
        assert_eq!(out.position_count(), 2);
        assert_eq!(out.block(0).unwrap().longs().unwrap().get(1), 40);

        let mut wrong = FilterOperator::new(0, factory.clone());
        wrong
            .add_input(Page::new(vec![factory.long_vector(vec![1]).unwrap()]).unwrap())
            .unwrap();
        assert!(wrong.get_output().unwrap_err().is_invariant_violation());
    }
}
