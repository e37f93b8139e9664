//! Parallel processing utilities.

use std::ops::Range;

use rayon::prelude::*;

#[cfg(test)]
mod tests;

/// Multiplier for number of ranges relative to pool threads.
/// Using 3x threads provides good load balancing when some ranges finish faster.
pub const RANGES_PER_THREAD: usize = 3;

/// Compute a range size that splits `len` items into roughly
/// `num_threads * RANGES_PER_THREAD` ranges, never below `min_range_size`.
#[inline]
pub fn auto_range_size(len: usize, num_threads: usize, min_range_size: usize) -> usize {
    let num_ranges = num_threads.max(1) * RANGES_PER_THREAD;
    (len / num_ranges).max(min_range_size).max(1)
}

/// Split `0..len` into consecutive ranges of at most `range_size` items.
///
/// # Panics
///
/// Panics if `range_size` is 0.
pub fn split_ranges(len: usize, range_size: usize) -> Vec<Range<usize>> {
    assert!(range_size > 0, "range_size must be > 0");

    (0..len)
        .step_by(range_size)
        .map(|start| start..(start + range_size).min(len))
        .collect()
}

/// Maps `f` over the ranges in parallel and folds the results with `reduce`.
///
/// Returns `identity()` when there are no ranges. `reduce` must be associative
/// for the result to be independent of how the work was split.
pub fn par_map_reduce_ranges<R, F, I, G>(
    ranges: &[Range<usize>],
    f: F,
    identity: I,
    reduce: G,
) -> R
where
    R: Send,
    F: Fn(Range<usize>) -> R + Sync,
    I: Fn() -> R + Sync + Send,
    G: Fn(R, R) -> R + Sync + Send,
{
    ranges
        .par_iter()
        .map(|range| f(range.clone()))
        .reduce(identity, reduce)
}
