#![allow(clippy::needless_range_loop)]

pub fn bits_u64(n: u64) -> usize {
    (64 - n.leading_zeros()) as usize
}

pub const fn ceil_div_usize(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Computes `ceil(log_2(n))`.
#[must_use]
pub fn log2_ceil(n: usize) -> usize {
    (usize::BITS - n.saturating_sub(1).leading_zeros()) as usize
}

/// Computes `log_2(n)`, panicking if `n` is not a power of two.
pub fn log2_strict(n: usize) -> usize {
    let res = n.trailing_zeros();
    assert!(n.wrapping_shr(res) == 1, "Not a power of two: {n}");
    res as usize
}

/// Rounds `n` up to the next power of two, treating zero as already rounded.
#[must_use]
pub fn next_power_of_two(n: usize) -> usize {
    if n <= 1 {
        n
    } else {
        1 << log2_ceil(n)
    }
}

/// Transposes a rectangular row-major matrix into a column-major one.
pub fn transpose<T: Copy>(matrix: &[Vec<T>]) -> Vec<Vec<T>> {
    if matrix.is_empty() {
        return Vec::new();
    }
    let width = matrix[0].len();
    debug_assert!(matrix.iter().all(|row| row.len() == width));
    let mut out = vec![Vec::with_capacity(matrix.len()); width];
    for row in matrix {
        for (j, &value) in row.iter().enumerate() {
            out[j].push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_u64() {
        assert_eq!(bits_u64(0), 0);
        assert_eq!(bits_u64(1), 1);
        assert_eq!(bits_u64(255), 8);
        assert_eq!(bits_u64(256), 9);
        assert_eq!(bits_u64(u64::MAX), 64);
    }

    #[test]
    fn test_log2_ceil() {
        assert_eq!(log2_ceil(0), 0);
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(3), 2);
        assert_eq!(log2_ceil(4), 2);
        assert_eq!(log2_ceil(5), 3);
    }

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(next_power_of_two(0), 0);
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(4), 4);
        assert_eq!(next_power_of_two(9), 16);
    }

    #[test]
    fn test_transpose() {
        let m = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert_eq!(transpose(&m), vec![vec![1, 4], vec![2, 5], vec![3, 6]]);
    }
}
