use super::*;

#[test]
fn test_split_ranges_covers_everything() {
    let ranges = split_ranges(10, 3);
    assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..10]);
}

#[test]
fn test_split_ranges_exact_multiple() {
    let ranges = split_ranges(9, 3);
    assert_eq!(ranges, vec![0..3, 3..6, 6..9]);
}

#[test]
fn test_split_ranges_empty() {
    assert!(split_ranges(0, 4).is_empty());
}

#[test]
fn test_split_ranges_size_exceeds_len() {
    assert_eq!(split_ranges(5, 100), vec![0..5]);
}

#[test]
#[should_panic(expected = "range_size must be > 0")]
fn test_split_ranges_zero_panics() {
    split_ranges(10, 0);
}

#[test]
fn test_auto_range_size_respects_minimum() {
    assert_eq!(auto_range_size(100, 8, 1000), 1000);
    assert_eq!(auto_range_size(0, 8, 0), 1);
}

#[test]
fn test_auto_range_size_divides_by_threads() {
    let len = 1_200_000;
    assert_eq!(auto_range_size(len, 4, 1), len / (4 * RANGES_PER_THREAD));
}

#[test]
fn test_par_map_reduce_ranges_sums_indices() {
    let ranges = split_ranges(1000, 37);
    let total = par_map_reduce_ranges(&ranges, |r| r.sum::<usize>(), || 0, |a, b| a + b);
    assert_eq!(total, (0..1000).sum::<usize>());
}

#[test]
fn test_par_map_reduce_ranges_empty_returns_identity() {
    let total = par_map_reduce_ranges(&[], |r| r.len(), || 42, |a, b| a + b);
    assert_eq!(total, 42);
}
