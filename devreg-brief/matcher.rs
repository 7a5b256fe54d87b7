use devreg_core::{hamming_distance, Descriptor};
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Nearest train descriptor for one query descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Brute-force Hamming matching, one match per query descriptor.
///
/// Ties go to the lowest train index. Output is ordered by query index and is
/// empty when either set is empty.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor]) -> Vec<Match> {
    if train.is_empty() {
        return Vec::new();
    }

    query
        .par_iter()
        .enumerate()
        .filter_map(|(query_idx, q)| {
            train
                .iter()
                .enumerate()
                .map(|(train_idx, t)| (hamming_distance(q, t), train_idx))
                .min()
                .map(|(distance, train_idx)| Match { query_idx, train_idx, distance })
        })
        .collect()
}

/// Keeps matches with `distance <= threshold`, preserving order
pub fn filter_matches(matches: &[Match], threshold: u32) -> Vec<Match> {
    matches.iter().copied().filter(|m| m.distance <= threshold).collect()
}

/// (best, worst) distance, `None` for an empty slice
pub fn distance_range(matches: &[Match]) -> Option<(u32, u32)> {
    let best = matches.iter().map(|m| m.distance).min()?;
    let worst = matches.iter().map(|m| m.distance).max()?;
    Some((best, worst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devreg_core::DESCRIPTOR_BYTES;
    use proptest::prelude::*;

    fn desc_with_bits(n: usize) -> Descriptor {
        let mut d = [0u8; DESCRIPTOR_BYTES];
        for i in 0..n {
            d[i / 8] |= 1 << (i % 8);
        }
        d
    }

    #[test]
    fn test_nearest_neighbour() {
        let train = vec![desc_with_bits(40), desc_with_bits(3), desc_with_bits(100)];
        let query = vec![desc_with_bits(0), desc_with_bits(98)];
        let matches = match_descriptors(&query, &train);
        assert_eq!(
            matches,
            vec![
                Match { query_idx: 0, train_idx: 1, distance: 3 },
                Match { query_idx: 1, train_idx: 2, distance: 2 },
            ]
        );
    }

    #[test]
    fn test_ties_prefer_lowest_train_index() {
        let train = vec![desc_with_bits(5), desc_with_bits(5)];
        let matches = match_descriptors(&[desc_with_bits(5)], &train);
        assert_eq!(matches[0].train_idx, 0);
        assert_eq!(matches[0].distance, 0);
    }

    #[test]
    fn test_empty_sets() {
        assert!(match_descriptors(&[], &[desc_with_bits(1)]).is_empty());
        assert!(match_descriptors(&[desc_with_bits(1)], &[]).is_empty());
        assert_eq!(distance_range(&[]), None);
    }

    #[test]
    fn test_filter_and_range() {
        let matches = vec![
            Match { query_idx: 0, train_idx: 0, distance: 10 },
            Match { query_idx: 1, train_idx: 4, distance: 30 },
            Match { query_idx: 2, train_idx: 2, distance: 25 },
        ];
        let kept = filter_matches(&matches, 25);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].query_idx, 2);
        assert_eq!(distance_range(&matches), Some((10, 30)));
    }

    proptest! {
        #[test]
        fn filter_is_monotone_in_threshold(
            distances in proptest::collection::vec(0u32..=256, 0..64),
            t1 in 0u32..=256,
            t2 in 0u32..=256,
        ) {
            let matches: Vec<Match> = distances
                .iter()
                .enumerate()
                .map(|(i, &distance)| Match { query_idx: i, train_idx: i, distance })
                .collect();
            let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
            prop_assert!(filter_matches(&matches, lo).len() <= filter_matches(&matches, hi).len());
        }
    }
}
