//! Shared weight matrices.
//!
//! Every training thread reads and writes the same tables with no locking
//! (Hogwild). Each cell is an `AtomicU32` accessed with relaxed ordering, so
//! concurrent updates to the same weight may lose one of the additions; that
//! is accepted.

use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::VocabError;
use crate::real;
use crate::rng::Rng;

const ALIGNMENT: usize = 128;

#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// How to fill a new table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    Zero,
    /// Uniform in `±0.5 / cols`.
    Uniform,
    /// Uniform in `±4·√(6 / (rows + cols))`, for weights feeding a sigmoid.
    Sigmoid,
}

/// Dimensions and row-major contents of a table, for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<real>,
}

pub struct EmbeddingTable {
    rows: usize,
    cols: usize,
    /// `data[r * cols..(r + 1) * cols]` is row `r`.
    data: AlignedBox<[Real]>,
    /// When false, the table is frozen: lookups work, updates are ignored.
    update: bool,
}

impl std::fmt::Debug for EmbeddingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingTable")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("update", &self.update)
            .finish()
    }
}

impl EmbeddingTable {
    pub fn new(rows: usize, cols: usize, init: Init, rng: &mut Rng) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| anyhow!("embedding table {rows}x{cols} is too large"))?;
        let data = AlignedBox::<[Real]>::slice_from_default(ALIGNMENT, len.max(1))
            .map_err(|err| anyhow!("memory allocation failed for a {rows}x{cols} table: {err}"))?;
        let table = EmbeddingTable {
            rows,
            cols,
            data,
            update: true,
        };
        match init {
            Init::Zero => {}
            Init::Uniform => {
                for cell in table.cells() {
                    cell.set((rng.next_float() - 0.5) / cols as real);
                }
            }
            Init::Sigmoid => {
                let bound = 4.0 * (6.0 / (rows + cols) as real).sqrt();
                for cell in table.cells() {
                    cell.set((rng.next_float() * 2.0 - 1.0) * bound);
                }
            }
        }
        Ok(table)
    }

    pub fn from_record(record: &TableRecord) -> Result<Self> {
        if record.rows * record.cols != record.data.len() {
            return Err(VocabError::TableShape {
                rows: record.rows,
                cols: record.cols,
                len: record.data.len(),
            }
            .into());
        }
        let table = EmbeddingTable::new(record.rows, record.cols, Init::Zero, &mut Rng::new(0))?;
        for (cell, &value) in table.cells().iter().zip(&record.data) {
            cell.set(value);
        }
        Ok(table)
    }

    pub fn to_record(&self) -> TableRecord {
        TableRecord {
            rows: self.rows,
            cols: self.cols,
            data: self.to_vec(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_update(&self) -> bool {
        self.update
    }

    pub fn set_update(&mut self, update: bool) {
        self.update = update;
    }

    fn cells(&self) -> &[Real] {
        &self.data[..self.rows * self.cols]
    }

    pub fn row(&self, r: usize) -> &[Real] {
        &self.data[r * self.cols..][..self.cols]
    }

    /// A copy of row `r`.
    pub fn row_vec(&self, r: usize) -> Vec<real> {
        self.row(r).iter().map(Real::get).collect()
    }

    /// All values, row-major.
    pub fn to_vec(&self) -> Vec<real> {
        self.cells().iter().map(Real::get).collect()
    }

    /// Copy row `r` into `out`.
    pub fn lookup(&self, r: usize, out: &mut [real]) {
        for (o, cell) in out[..self.cols].iter_mut().zip(self.row(r)) {
            *o = cell.get();
        }
    }

    /// Store the average of `rows` in `out`.
    ///
    /// If `seeded`, `out` already holds one vector that takes part in the
    /// average. Returns the number of vectors averaged; if that is 0, `out`
    /// is left zeroed.
    pub fn lookup_average(&self, rows: &[usize], out: &mut [real], seeded: bool) -> usize {
        let out = &mut out[..self.cols];
        if !seeded {
            out.fill(0.0);
        }
        for &r in rows {
            for (o, cell) in out.iter_mut().zip(self.row(r)) {
                *o += cell.get();
            }
        }
        let n = rows.len() + seeded as usize;
        if n > 1 {
            for o in out {
                *o /= n as real;
            }
        }
        n
    }

    /// Copy `rows` side by side into `out`, starting `offset` elements in.
    pub fn lookup_concat(&self, rows: &[usize], out: &mut [real], offset: usize) {
        for (k, &r) in rows.iter().enumerate() {
            self.lookup(r, &mut out[offset + k * self.cols..]);
        }
    }

    /// Dot product of row `r` with `v`.
    pub fn dot(&self, r: usize, v: &[real]) -> real {
        self.row(r)
            .iter()
            .zip(v)
            .map(|(cell, &x)| cell.get() * x)
            .sum()
    }

    /// Backward step of `dot`: `grad += g * row`, then `row += g * v`.
    pub fn backward_dot(&self, r: usize, v: &[real], g: real, grad: &mut [real]) {
        let row = self.row(r);
        // Propagate errors output -> hidden
        for (gr, cell) in grad.iter_mut().zip(row) {
            *gr += g * cell.get();
        }
        // Learn weights hidden -> output
        if self.update {
            for (cell, &x) in row.iter().zip(v) {
                cell.add(g * x);
            }
        }
    }

    /// `row += scale * grad`.
    pub fn add_row(&self, r: usize, grad: &[real], scale: real) {
        if !self.update {
            return;
        }
        for (cell, &g) in self.row(r).iter().zip(grad) {
            cell.add(scale * g);
        }
    }

    /// Backward step of `lookup_average`: each averaged row gets its share of `grad`.
    pub fn backward_average(&self, rows: &[usize], grad: &[real], seeded: bool) {
        let n = rows.len() + seeded as usize;
        if n == 0 {
            return;
        }
        let scale = 1.0 / n as real;
        for &r in rows {
            self.add_row(r, grad, scale);
        }
    }

    /// Backward step of `lookup_concat`.
    pub fn backward_concat(&self, rows: &[usize], grad: &[real], offset: usize) {
        for (k, &r) in rows.iter().enumerate() {
            self.add_row(r, &grad[offset + k * self.cols..][..self.cols], 1.0);
        }
    }
}
