//! Sorting and partitioning of row-major matrices.
//!
//! A matrix is a flat `&mut [f32]` of `n * width` values where row `i`
//! occupies `data[i * width .. (i + 1) * width]`. Rows always move as a
//! unit, so the association between the columns of a row is preserved.

/// Sorts the rows of a row-major matrix in place, in ascending order of
/// the value in `column`.
///
/// Quick-sort with a Hoare partition around the middle row's value.
/// Equal keys keep no particular order.
///
/// # Panics
/// Panics if `width == 0`, `column >= width` or `data.len()` is not a
/// multiple of `width`.
pub fn sort_rows_by_column(column: usize, width: usize, data: &mut [f32]) {
    assert!(width > 0 && column < width);
    assert_eq!(data.len() % width, 0);
    let n = data.len() / width;
    if n == 2 {
        if data[column] > data[width + column] {
            swap_rows(width, data, 0, 1);
        }
    } else if n > 2 {
        let p = partition(column, width, data);
        let (left, right) = data.split_at_mut(p * width);
        sort_rows_by_column(column, width, left);
        sort_rows_by_column(column, width, right);
    }
}

/// Partitions rows around the key of the middle row. Returns the number
/// of rows in the left block; every left row has `key <= pivot` and every
/// right row has `key >= pivot`.
fn partition(column: usize, width: usize, data: &mut [f32]) -> usize {
    let n = data.len() / width;
    let pivot = data[(n - 1) / 2 * width + column];
    let mut i = -1isize;
    let mut j = n as isize;
    loop {
        loop {
            i += 1;
            if data[i as usize * width + column] >= pivot {
                break;
            }
        }
        loop {
            j -= 1;
            if data[j as usize * width + column] <= pivot {
                break;
            }
        }
        if i >= j {
            return (j + 1) as usize;
        }
        swap_rows(width, data, i as usize, j as usize);
    }
}

/// Stable two-block partition: moves the rows whose value in `column` is
/// `<= threshold` to the front, keeping their relative order. Returns the
/// number of rows in the front block.
pub fn partition_rows(column: usize, width: usize, data: &mut [f32], threshold: f32) -> usize {
    assert!(width > 0 && column < width);
    assert_eq!(data.len() % width, 0);
    let n = data.len() / width;
    let mut buffer = Vec::with_capacity(data.len());
    let mut n_left = 0;
    for row in 0..n {
        if data[row * width + column] <= threshold {
            buffer.extend_from_slice(&data[row * width..(row + 1) * width]);
            n_left += 1;
        }
    }
    for row in 0..n {
        if data[row * width + column] > threshold {
            buffer.extend_from_slice(&data[row * width..(row + 1) * width]);
        }
    }
    data.copy_from_slice(&buffer);
    n_left
}

/// Sorts a plain float slice in ascending order. NaNs gather at the end.
pub fn sort_floats(xs: &mut [f32]) {
    xs.sort_unstable_by(f32::total_cmp);
}

fn swap_rows(width: usize, data: &mut [f32], a: usize, b: usize) {
    for k in 0..width {
        data.swap(a * width + k, b * width + k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[rustfmt::skip]
    const FIXTURE: [f32; 18] = [
         0.1,  0.5,
        -1.3,  2.5,
         3.2,  0.7,
         2.0, -1.5,
         5.9,  8.2,
         2.7,  1.7,
         3.4,  4.7,
         1.2, -0.7,
        -5.7, -0.5,
    ];

    #[test]
    fn sorts_nine_rows_by_first_column() {
        #[rustfmt::skip]
        let expected: [f32; 18] = [
            -5.7, -0.5,
            -1.3,  2.5,
             0.1,  0.5,
             1.2, -0.7,
             2.0, -1.5,
             2.7,  1.7,
             3.2,  0.7,
             3.4,  4.7,
             5.9,  8.2,
        ];
        let mut x = FIXTURE;
        sort_rows_by_column(0, 2, &mut x);
        assert_eq!(x, expected);
    }

    #[test]
    fn sorts_nine_rows_by_second_column() {
        #[rustfmt::skip]
        let expected: [f32; 18] = [
             2.0, -1.5,
             1.2, -0.7,
            -5.7, -0.5,
             0.1,  0.5,
             3.2,  0.7,
             2.7,  1.7,
            -1.3,  2.5,
             3.4,  4.7,
             5.9,  8.2,
        ];
        let mut x = FIXTURE;
        sort_rows_by_column(0, 2, &mut x);
        sort_rows_by_column(1, 2, &mut x);
        assert_eq!(x, expected);
    }

    #[test]
    fn sorts_trivial_sizes() {
        let mut empty: [f32; 0] = [];
        sort_rows_by_column(0, 3, &mut empty);
        let mut one = [4.0, 5.0];
        sort_rows_by_column(1, 2, &mut one);
        assert_eq!(one, [4.0, 5.0]);
        let mut two = [9.0, 1.0, 3.0, 2.0];
        sort_rows_by_column(0, 2, &mut two);
        assert_eq!(two, [3.0, 2.0, 9.0, 1.0]);
    }

    #[test]
    fn partitions_rows_around_threshold() {
        let mut x = FIXTURE;
        let n_left = partition_rows(0, 2, &mut x, 2.0);
        assert_eq!(n_left, 5);
        for row in 0..5 {
            assert!(x[row * 2] <= 2.0);
        }
        for row in 5..9 {
            assert!(x[row * 2] > 2.0);
        }
        // Stability: original relative order inside each block.
        assert_eq!(&x[..4], &[0.1, 0.5, -1.3, 2.5]);
    }

    fn rows(data: &[f32], width: usize) -> Vec<Vec<u32>> {
        data.chunks(width)
            .map(|r| r.iter().map(|v| v.to_bits()).collect())
            .collect()
    }

    proptest! {
        #[test]
        fn sort_preserves_row_integrity(
            raw in prop::collection::vec(-1e6f32..1e6, 0..200),
            width in 1usize..5,
            column in 0usize..5,
        ) {
            let column = column % width;
            let n = raw.len() / width;
            let mut data = raw[..n * width].to_vec();
            let before = rows(&data, width);
            sort_rows_by_column(column, width, &mut data);
            let mut after = rows(&data, width);
            // Every input row is still present exactly once.
            let mut sorted_before = before;
            sorted_before.sort();
            after.sort();
            prop_assert_eq!(sorted_before, after);
        }

        #[test]
        fn sort_orders_selected_column(
            raw in prop::collection::vec(-1e6f32..1e6, 0..200),
            width in 1usize..5,
        ) {
            let n = raw.len() / width;
            let mut data = raw[..n * width].to_vec();
            sort_rows_by_column(0, width, &mut data);
            for row in 1..n {
                prop_assert!(data[(row - 1) * width] <= data[row * width]);
            }
        }
    }
}
