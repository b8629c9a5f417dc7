//! Bounded, sorted row buffer.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::mem;

use common_error::{QuarryError, QuarryResult};
use log::debug;

use super::encoder::{SortOrder, TopNEncoder};
use crate::data::{Block, ElementType, Page, Scalar};
use crate::memory::{BlockFactory, MemoryReservation};
use crate::operator::{not_accepting, Operator};

const ROW_OVERHEAD: usize = 64;

/// A retained row: its encoded keys, arrival sequence and values.
#[derive(Debug)]
struct Row {
    keys: Vec<u8>,
    seq: u64,
    values: Vec<Vec<Scalar>>,
    ram_bytes: usize,
}

impl Row {
    fn estimate(keys: &[u8], values: &[Vec<Scalar>]) -> usize {
        let scalars: usize = values
            .iter()
            .flatten()
            .map(|v| mem::size_of::<Scalar>() + v.as_bytes().map_or(0, <[u8]>::len))
            .sum();
        ROW_OVERHEAD + keys.len() + values.len() * mem::size_of::<Vec<Scalar>>() + scalars
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Row {}

impl PartialOrd for Row {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Smaller is better; the heap keeps the worst retained row on top.
impl Ord for Row {
    fn cmp(&self, other: &Self) -> Ordering {
        self.keys.cmp(&other.keys).then(self.seq.cmp(&other.seq))
    }
}

/// Keeps the best `limit` rows by the key chain in `orders` and emits them
/// fully sorted once input ends.
///
/// Rows with equal keys keep their arrival order. A new row only displaces
/// the worst retained row when it is strictly better.
#[derive(Debug)]
pub struct TopNOperator {
    factory: BlockFactory,
    limit: usize,
    element_types: Vec<ElementType>,
    encoders: Vec<TopNEncoder>,
    orders: Vec<SortOrder>,
    page_size: usize,
    heap: BinaryHeap<Row>,
    reservation: MemoryReservation,
    next_seq: u64,
    rows_in: usize,
    output: VecDeque<Page>,
    finished: bool,
}

impl TopNOperator {
    pub fn new(
        factory: BlockFactory,
        limit: usize,
        element_types: Vec<ElementType>,
        encoders: Vec<TopNEncoder>,
        orders: Vec<SortOrder>,
        page_size: usize,
    ) -> QuarryResult<Self> {
        if encoders.len() != element_types.len() {
            return Err(QuarryError::invalid_argument(format!(
                "{} element types but {} encoders",
                element_types.len(),
                encoders.len()
            )));
        }
        if page_size == 0 {
            return Err(QuarryError::invalid_argument("page size must be positive"));
        }
        if let Some((channel, encoder)) = element_types
            .iter()
            .zip(&encoders)
            .enumerate()
            .find_map(|(c, (t, e))| (!e.supports(*t)).then_some((c, e)))
        {
            return Err(QuarryError::invalid_argument(format!(
                "channel {channel} of type {} cannot use {encoder:?}",
                element_types[channel]
            )));
        }
        for order in &orders {
            let encoder = encoders.get(order.channel).ok_or_else(|| {
                QuarryError::invalid_argument(format!("sort channel {} out of range", order.channel))
            })?;
            if !encoder.is_sortable() {
                return Err(QuarryError::invalid_argument(format!(
                    "channel {} is not sortable",
                    order.channel
                )));
            }
        }
        let reservation = MemoryReservation::empty(factory.accountant().clone(), "topn_rows");
        Ok(Self {
            factory,
            limit,
            element_types,
            encoders,
            orders,
            page_size,
            heap: BinaryHeap::new(),
            reservation,
            next_seq: 0,
            rows_in: 0,
            output: VecDeque::new(),
            finished: false,
        })
    }

    /// Rows currently retained.
    pub fn retained(&self) -> usize {
        self.heap.len()
    }

    pub fn ram_bytes(&self) -> usize {
        self.reservation.size()
    }

    fn keys(&self, page: &Page, position: usize) -> QuarryResult<Vec<u8>> {
        let mut keys = Vec::new();
        for order in &self.orders {
            let values = page.block(order.channel)?.values_at(position);
            order.encode_key(self.encoders[order.channel], &values, &mut keys)?;
        }
        Ok(keys)
    }

    fn offer(&mut self, page: &Page, position: usize) -> QuarryResult<()> {
        let keys = self.keys(page, position)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.heap.len() >= self.limit {
            match self.heap.peek() {
                Some(worst) if (&keys, seq) < (&worst.keys, worst.seq) => {}
                _ => return Ok(()),
            }
        }

        let values: Vec<Vec<Scalar>> = page.blocks().iter().map(|b| b.values_at(position)).collect();
        let ram_bytes = Row::estimate(&keys, &values);
        self.reservation.grow(ram_bytes)?;
        if self.heap.len() >= self.limit {
            if let Some(evicted) = self.heap.pop() {
                self.reservation.shrink(evicted.ram_bytes);
            }
        }
        self.heap.push(Row {
            keys,
            seq,
            values,
            ram_bytes,
        });
        Ok(())
    }

    fn check_page(&self, page: &Page) -> QuarryResult<()> {
        if page.block_count() != self.element_types.len() {
            return Err(QuarryError::invariant(format!(
                "TopNOperator expects {} blocks, got {}",
                self.element_types.len(),
                page.block_count()
            )));
        }
        for (channel, (block, expected)) in page.blocks().iter().zip(&self.element_types).enumerate() {
            let actual = block.element_type();
            if actual != *expected && actual != ElementType::Null {
                return Err(QuarryError::invariant(format!(
                    "channel {channel} expected {expected}, got {actual}"
                )));
            }
        }
        Ok(())
    }

    fn build_output(&mut self) -> QuarryResult<()> {
        let rows = mem::take(&mut self.heap).into_sorted_vec();
        debug!("top-n kept {} of {} rows", rows.len(), self.rows_in);
        for chunk in rows.chunks(self.page_size) {
            let mut blocks = Vec::with_capacity(self.element_types.len());
            for (channel, &element_type) in self.element_types.iter().enumerate() {
                blocks.push(build_column(&self.factory, element_type, chunk, channel)?);
            }
            self.output.push_back(Page::with_position_count(chunk.len(), blocks)?);
        }
        self.reservation.resize_to(0)
    }
}

fn build_column(factory: &BlockFactory, element_type: ElementType, rows: &[Row], channel: usize) -> QuarryResult<Block> {
    let mut builder = factory.builder(element_type, rows.len())?;
    for row in rows {
        match row.values[channel].as_slice() {
            [] => builder.append_null()?,
            [value] => builder.append_scalar(value)?,
            values => {
                builder.begin_position_entry()?;
                for value in values {
                    builder.append_scalar(value)?;
                }
                builder.end_position_entry()?;
            }
        }
    }
    builder.build()
}

impl Operator for TopNOperator {
    fn name(&self) -> &'static str {
        "TopNOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if self.finished {
            return Err(not_accepting(self.name()));
        }
        self.check_page(&page)?;
        self.rows_in += page.position_count();
        for position in 0..page.position_count() {
            self.offer(&page, position)?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished && self.heap.is_empty() && self.output.is_empty()
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        if !self.finished {
            return Ok(None);
        }
        if !self.heap.is_empty() {
            self.build_output()?;
        }
        Ok(self.output.pop_front())
    }

    fn close(&mut self) {
        self.heap.clear();
        self.output.clear();
        self.reservation.shrink(self.reservation.size());
    }

    fn display(&self) -> String {
        let orders: Vec<String> = self.orders.iter().map(ToString::to_string).collect();
        format!(
            "TopNOperator[count = {}/{}, elementTypes = {:?}, sortOrders = [{}]]",
            self.heap.len(),
            self.limit,
            self.element_types,
            orders.join(", ")
        )
    }
}
