//! K-means clustering of vectors into word classes.

use anyhow::{bail, Result};

use crate::table::EmbeddingTable;
use crate::{normalize, real};

pub const DEFAULT_ITERATIONS: usize = 10;

/// Assign each row of `table` to one of `classes` clusters.
///
/// Rows start out dealt round-robin; each iteration recomputes the unit-length
/// center of every class and moves each row to the class whose center has the
/// largest dot product with it.
pub fn classes(table: &EmbeddingTable, classes: usize, iterations: usize) -> Result<Vec<usize>> {
    if classes == 0 {
        bail!("need at least one class");
    }
    let rows = table.rows();
    let size = table.cols();
    let mut cl: Vec<usize> = (0..rows).map(|a| a % classes).collect();
    let mut cent: Vec<real> = vec![0.0; classes * size];
    let mut centcn = vec![0usize; classes];

    for _ in 0..iterations {
        cent.fill(0.0);
        centcn.fill(1);

        // Set cent[c] = sum of vectors in class c, centcn[c] = number of vectors in class c + 1
        for c in 0..rows {
            for (x, cell) in cent[size * cl[c]..][..size].iter_mut().zip(table.row(c)) {
                *x += cell.get();
            }
            centcn[cl[c]] += 1;
        }

        // Set cent[c] = center of class c, normalized to length 1
        for (center, &n) in cent.chunks_mut(size).zip(&centcn) {
            for x in center.iter_mut() {
                *x /= n as real;
            }
            normalize(center);
        }

        // Move vectors to nearest class (by dot-product similarity with center of class).
        for (c, class) in cl.iter_mut().enumerate() {
            let mut closev: real = -10.0;
            let mut closeid = 0;
            for (d, center) in cent.chunks(size).enumerate() {
                let x = table.dot(c, center);
                if x > closev {
                    closev = x;
                    closeid = d;
                }
            }
            *class = closeid;
        }
    }
    Ok(cl)
}
