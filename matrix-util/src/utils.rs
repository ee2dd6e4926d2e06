use fnv::FnvHashMap as HashMap;
use std::hash::Hash;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., batch labels)
/// # Returns
/// A hashmap: group name -> indexes of the elements, in their original order
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut groups: HashMap<T, Vec<usize>> = HashMap::default();
    for (i, k) in membership.iter().enumerate() {
        groups.entry(k.clone()).or_default().push(i);
    }
    groups
}

/// Same as `partition_by_membership`, but ordered by `order`; groups
/// listed in `order` without any element come out empty
pub fn ordered_partition_by_membership<T>(membership: &[T], order: &[T]) -> Vec<(T, Vec<usize>)>
where
    T: Eq + Hash + Clone,
{
    let mut groups = partition_by_membership(membership);
    order
        .iter()
        .map(|k| (k.clone(), groups.remove(k).unwrap_or_default()))
        .collect()
}

/// All unordered pairs `(i, j)` with `i < j < n` in lexicographic order
pub fn unordered_pairs(n: usize) -> Vec<(usize, usize)> {
    (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect()
}

/// Empirical quantile with linear interpolation between order statistics
/// * `values` - data (need not be sorted)
/// * `prob` - probability in [0, 1]
pub fn quantile(values: &[f32], prob: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = prob.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lb = pos.floor() as usize;
    let ub = pos.ceil() as usize;
    let frac = pos - lb as f32;
    Some(sorted[lb] + (sorted[ub] - sorted[lb]) * frac)
}

/// Median of a slice of ranks or values
pub fn median(values: &[f32]) -> Option<f32> {
    quantile(values, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_partition_keeps_order() {
        let memb = vec!["b", "a", "b", "c"];
        let parts = ordered_partition_by_membership(&memb, &["a", "b", "c", "d"]);
        assert_eq!(
            parts,
            vec![
                ("a", vec![1]),
                ("b", vec![0, 2]),
                ("c", vec![3]),
                ("d", vec![])
            ]
        );
    }

    #[test]
    fn pairs_and_quantiles() {
        assert_eq!(unordered_pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert_eq!(quantile(&[3.0, 1.0, 2.0], 0.5), Some(2.0));
        assert_eq!(quantile(&[0.0, 10.0], 0.25), Some(2.5));
        assert_eq!(quantile(&[], 0.5), None);
    }
}
