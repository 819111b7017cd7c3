//! Parallel partition-sort-merge.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::config::MAX_SORT_SLICES;

/// Sorts `items` with up to `slices` parallel slice sorts and a k-way merge.
///
/// The slices are equal-sized runs of the input, each sorted on its own;
/// the merge repeatedly takes the smallest head, preferring the lower slice
/// on ties. The result equals a single stable sort for any slice count.
/// `scratch` holds the merged output and is swapped with `items`.
pub fn parallel_sort_merge<T, F>(items: &mut Vec<T>, scratch: &mut Vec<T>, slices: usize, compare: F)
where
    T: Clone + Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    let len = items.len();
    if len < 2 {
        return;
    }

    let slice_len = len.div_ceil(slices.clamp(1, MAX_SORT_SLICES));
    items
        .par_chunks_mut(slice_len)
        .for_each(|slice| slice.sort_by(&compare));

    let slice_count = len.div_ceil(slice_len);
    if slice_count == 1 {
        return;
    }

    let mut heads = [0usize; MAX_SORT_SLICES];
    let mut ends = [0usize; MAX_SORT_SLICES];
    for slice in 0..slice_count {
        heads[slice] = slice * slice_len;
        ends[slice] = ((slice + 1) * slice_len).min(len);
    }

    scratch.clear();
    scratch.reserve(len);
    loop {
        let mut best: Option<usize> = None;
        for slice in 0..slice_count {
            if heads[slice] == ends[slice] {
                continue;
            }
            best = match best {
                Some(current)
                    if compare(&items[heads[slice]], &items[heads[current]]) != Ordering::Less =>
                {
                    Some(current)
                }
                _ => Some(slice),
            };
        }
        let Some(slice) = best else {
            break;
        };
        scratch.push(items[heads[slice]].clone());
        heads[slice] += 1;
    }

    std::mem::swap(items, scratch);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xorshift(state: &mut u64) -> u64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    #[test]
    fn test_matches_single_sort() {
        let mut state = 0x9E37_79B9_7F4A_7C15;
        for len in [0, 1, 2, 3, 7, 8, 9, 100, 1000] {
            let input: Vec<u32> = (0..len).map(|_| (xorshift(&mut state) % 50) as u32).collect();
            let mut expected = input.clone();
            expected.sort_unstable();

            for slices in 1..=MAX_SORT_SLICES {
                let mut items = input.clone();
                let mut scratch = Vec::new();
                parallel_sort_merge(&mut items, &mut scratch, slices, u32::cmp);
                assert_eq!(items, expected, "len {len}, slices {slices}");
            }
        }
    }

    #[test]
    fn test_ties_keep_input_order() {
        let input: Vec<(u8, usize)> = (0..40).map(|i| ((i % 3) as u8, i)).collect();
        let mut expected = input.clone();
        expected.sort_by_key(|&(key, _)| key);

        let mut items = input;
        let mut scratch = Vec::new();
        parallel_sort_merge(&mut items, &mut scratch, 5, |a, b| a.0.cmp(&b.0));
        assert_eq!(items, expected);
    }
}
