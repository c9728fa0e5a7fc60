use super::{AdaptiveCounter, CounterRates};
use crate::error::{Error, Result};
use crate::models::{Bit, ScaledFreq};
use crate::pool::TablePool;

/// Widest context a table may be indexed with
pub const MAX_CONTEXT_BITS: u32 = 28;

/// `2^context_bits` adaptive counters, owned or borrowed from a [`TablePool`]
pub struct CounterTable {
    cells: Vec<u32>,
    mask: usize,
    rates: CounterRates,
    pool: Option<TablePool>,
}

impl CounterTable {
    pub fn new(context_bits: u32, rates: CounterRates, pool: Option<&TablePool>) -> Result<Self> {
        rates.validate()?;
        if !(1..=MAX_CONTEXT_BITS).contains(&context_bits) {
            return Err(Error::InvalidConfig(format!(
                "context_bits must be in 1..={MAX_CONTEXT_BITS}, got {context_bits}"
            )));
        }

        let len = 1usize << context_bits;
        let mut cells = match pool {
            Some(pool) => pool.allocate(len)?,
            None => vec![0; len],
        };
        cells.fill(AdaptiveCounter::new(rates.precision).raw());

        Ok(Self { cells, mask: len - 1, rates, pool: pool.cloned() })
    }

    #[inline(always)]
    fn counter(&self, idx: usize) -> AdaptiveCounter {
        // released tables keep answering 1/2
        self.cells
            .get(idx & self.mask)
            .map_or(AdaptiveCounter::new(self.rates.precision), |&raw| AdaptiveCounter::from_raw(raw))
    }

    #[inline(always)]
    pub fn p(&self, idx: usize) -> ScaledFreq {
        self.counter(idx).p()
    }

    pub fn count(&self, idx: usize) -> u32 {
        self.counter(idx).count()
    }

    #[inline]
    pub fn update(&mut self, idx: usize, bit: Bit) {
        let next = self.counter(idx).update(bit, &self.rates);
        if let Some(cell) = self.cells.get_mut(idx & self.mask) {
            *cell = next.raw();
        }
    }

    pub fn rates(&self) -> &CounterRates {
        &self.rates
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Gives the cells back to the pool, safe to call more than once
    pub fn release(&mut self) {
        let cells = std::mem::take(&mut self.cells);
        if let Some(pool) = &self.pool {
            if !cells.is_empty() {
                pool.release(cells);
            }
        }
    }
}

impl Drop for CounterTable {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: CounterRates = CounterRates { precision: 12, max_count: 8, recip_base_count: 4 };

    #[test]
    fn indices_wrap_around_the_mask() {
        let mut table = CounterTable::new(4, RATES, None).unwrap();
        assert_eq!(table.len(), 16);
        table.update(3, 1);
        assert_eq!(table.p(3), table.p(3 + 16));
        assert!(table.p(3) > 1 << 11);
        assert_eq!(table.p(4), 1 << 11);
    }

    #[test]
    fn pooled_tables_are_returned_once() {
        let pool = TablePool::new();
        let mut table = CounterTable::new(10, RATES, Some(&pool)).unwrap();
        assert_eq!(pool.lent_bytes(), 4096);
        table.release();
        table.release();
        assert_eq!(pool.lent_bytes(), 0);
        assert!(table.is_empty());
        assert_eq!(table.p(5), 1 << 11);
        drop(table);
        assert_eq!(pool.lent_bytes(), 0);
    }

    #[test]
    fn dropping_returns_pooled_tables() {
        let pool = TablePool::new();
        {
            let _table = CounterTable::new(10, RATES, Some(&pool)).unwrap();
            assert_eq!(pool.lent_bytes(), 4096);
        }
        assert_eq!(pool.lent_bytes(), 0);
    }

    #[test]
    fn reused_tables_start_fresh() {
        let pool = TablePool::new();
        let mut table = CounterTable::new(6, RATES, Some(&pool)).unwrap();
        table.update(1, 1);
        table.release();
        let table = CounterTable::new(6, RATES, Some(&pool)).unwrap();
        assert_eq!(table.p(1), 1 << 11);
        assert_eq!(table.count(1), 0);
    }

    #[test]
    fn rejects_bad_widths() {
        assert!(CounterTable::new(0, RATES, None).is_err());
        assert!(CounterTable::new(MAX_CONTEXT_BITS + 1, RATES, None).is_err());
    }
}
