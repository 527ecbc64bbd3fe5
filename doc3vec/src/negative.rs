//! The unigram table negative samples are drawn from.

use crate::error::VocabError;
use crate::rng::Rng;

#[derive(Debug, Clone)]
pub struct NegativeTable {
    table: Vec<u32>,
    items: usize,
}

impl NegativeTable {
    /// Fill `size` slots so that item `i` owns a contiguous run of slots
    /// proportional to `counts[i]^power`.
    ///
    /// When there are at least as many slots as items, every item with a
    /// nonzero count gets at least one slot.
    pub fn new(counts: &[u64], size: usize, power: f64) -> Result<Self, VocabError> {
        let total_pow = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| (c as f64).powf(power))
            .sum::<f64>();
        if total_pow <= 0.0 || size == 0 {
            return Err(VocabError::NoMass);
        }

        let nonzero = counts.iter().filter(|&&c| c > 0).count();
        let reserve = size >= nonzero;
        let mut remaining = nonzero;

        let mut table = Vec::with_capacity(size);
        let mut cumulative = 0.0;
        let mut last = 0;
        for (i, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            remaining -= 1;
            last = i;
            cumulative += (count as f64).powf(power);
            let mut end = ((cumulative / total_pow) * size as f64).round() as usize;
            if reserve {
                // one slot for this item, one for each item still to come
                end = end.max(table.len() + 1).min(size - remaining);
            }
            let end = end.min(size);
            while table.len() < end {
                table.push(i as u32);
            }
        }
        // rounding can leave the last few slots empty
        table.resize(size, last as u32);
        Ok(NegativeTable {
            table,
            items: counts.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, slot: usize) -> usize {
        self.table[slot] as usize
    }

    /// Draw one item. A draw of the start symbol (item 0) is replaced by a
    /// uniformly chosen other item.
    pub fn sample(&self, rng: &mut Rng) -> usize {
        let r = rng.next_u64();
        match self.table[(r >> 16) as usize % self.table.len()] as usize {
            0 if self.items > 1 => r as usize % (self.items - 1) + 1,
            i => i,
        }
    }
}
