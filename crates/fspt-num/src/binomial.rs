//! Memoised binomial coefficients.
//!
//! The coefficients live in a process-wide Pascal triangle that grows
//! lazily row by row. Growth is double-checked: readers take the shared
//! lock, and only when the triangle is too small is the exclusive lock
//! taken and the bound re-checked before extending.

use std::sync::RwLock;

static PASCAL: RwLock<Vec<Vec<u64>>> = RwLock::new(Vec::new());

/// `C(n, k)` from the memoised Pascal triangle.
///
/// Returns 0 for `k > n`. Exact as long as the coefficient fits in a
/// `u64`; rows are built with wrapping additions beyond that, matching
/// the fixed-width arithmetic of the historical implementation.
pub fn binomial(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    {
        let table = PASCAL.read().expect("pascal triangle poisoned");
        if n < table.len() {
            return table[n][k];
        }
    }
    let mut table = PASCAL.write().expect("pascal triangle poisoned");
    if n >= table.len() {
        grow_to(&mut table, n);
    }
    table[n][k]
}

fn grow_to(table: &mut Vec<Vec<u64>>, n: usize) {
    for i in table.len()..=n {
        let mut row = vec![1u64; i + 1];
        for j in 1..i {
            row[j] = table[i - 1][j].wrapping_add(table[i - 1][j - 1]);
        }
        table.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_coefficients() {
        assert_eq!(binomial(0, 0), 1);
        assert_eq!(binomial(1, 0), 1);
        assert_eq!(binomial(1, 1), 1);
        assert_eq!(binomial(4, 2), 6);
        assert_eq!(binomial(10, 3), 120);
        assert_eq!(binomial(10, 7), 120);
    }

    #[test]
    fn out_of_range_is_zero() {
        assert_eq!(binomial(3, 4), 0);
        assert_eq!(binomial(0, 1), 0);
    }

    #[test]
    fn rows_sum_to_powers_of_two() {
        for n in 0..20 {
            let sum: u64 = (0..=n).map(|k| binomial(n, k)).sum();
            assert_eq!(sum, 1 << n);
        }
    }

    #[test]
    fn shrinking_queries_after_growth() {
        assert_eq!(binomial(30, 15), 155_117_520);
        assert_eq!(binomial(5, 2), 10);
    }
}
