//! Stride decimation of large vertex sets.

/// Stride keeping at most `cap` of `n` elements, `ceil(n / cap)`.
///
/// # Panics
///
/// Panics if `cap` is zero.
pub fn stride(n: usize, cap: usize) -> usize {
    assert!(cap > 0, "decimation cap must be positive");
    n.div_ceil(cap).max(1)
}

/// Indices of the elements kept when decimating `n` elements down to `cap`.
pub fn kept_indices(n: usize, cap: usize) -> impl Iterator<Item = usize> + Clone {
    (0..n).step_by(stride(n, cap))
}

/// Every `stride(items.len(), cap)`-th element, starting with the first.
pub fn decimate<T: Copy>(items: &[T], cap: usize) -> Vec<T> {
    kept_indices(items.len(), cap).map(|i| items[i]).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn small_inputs_are_kept() {
        assert_eq!(stride(0, 10), 1);
        assert_eq!(stride(10, 10), 1);
        assert_eq!(decimate(&[1, 2, 3], 10), vec![1, 2, 3]);
    }

    #[test]
    fn large_inputs_are_strided() {
        assert_eq!(stride(11, 10), 2);
        assert_eq!(decimate(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 10), vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(kept_indices(1_000_000, 1000).count(), 1000);
    }

    proptest! {
        #[test]
        fn decimation_respects_the_cap(n in 0usize..10_000, cap in 1usize..500) {
            let kept = kept_indices(n, cap).collect::<Vec<_>>();
            prop_assert!(kept.len() <= cap);
            prop_assert_eq!(kept.first().copied(), (n > 0).then_some(0));
            prop_assert_eq!(kept, kept_indices(n, cap).collect::<Vec<_>>());
        }
    }
}
