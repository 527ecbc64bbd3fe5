//! Lookup-table approximation of the logistic function.

use crate::real;

pub const EXP_TABLE_SIZE: usize = 1000;
pub const MAX_EXP: real = 6.0;

#[derive(Debug, Clone)]
pub struct Sigmoid {
    table: Vec<real>,
}

impl Default for Sigmoid {
    fn default() -> Self {
        Sigmoid::new()
    }
}

impl Sigmoid {
    pub fn new() -> Self {
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let j = (i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP;
                let e = (j as f64).exp() as f32; // Precompute the exp() table
                e / (e + 1.0) // Precompute f(x) = x / (x + 1)
            })
            .collect();
        Sigmoid { table }
    }

    /// Approximate the logistic function, 1 / (1 + e^-x).
    ///
    /// Saturates to exactly 0 or 1 outside `-MAX_EXP..MAX_EXP`.
    pub fn get(&self, x: real) -> real {
        if x >= MAX_EXP {
            1.0
        } else if x <= -MAX_EXP {
            0.0
        } else {
            let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize;
            self.table[i.min(EXP_TABLE_SIZE - 1)]
        }
    }
}

/// `ln(1 / (1 + e^-x))`, computed exactly. Only used outside the hot loop.
pub fn log_sigmoid(x: real) -> real {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_close_to_exact() {
        let sigmoid = Sigmoid::new();
        let mut x: real = -5.99;
        while x < 5.99 {
            let exact = 1.0 / (1.0 + (-x).exp());
            assert!((sigmoid.get(x) - exact).abs() < 0.01, "x = {x}");
            x += 0.037;
        }
        assert_eq!(sigmoid.get(100.0), 1.0);
        assert_eq!(sigmoid.get(-100.0), 0.0);
    }

    #[test]
    fn test_log_sigmoid() {
        for x in [-30.0, -2.0, 0.0, 0.5, 3.0, 30.0] {
            let exact = (1.0f64 / (1.0 + (-(x as f64)).exp())).ln() as real;
            assert!((log_sigmoid(x) - exact).abs() < 1e-5, "x = {x}");
        }
    }
}
