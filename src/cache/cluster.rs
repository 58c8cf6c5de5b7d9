/// Single-linkage agglomerative clustering used to order region names
///
/// The distance matrix may be asymmetric; the smaller of the two directions
/// is used. Ties merge the lowest-indexed pair first, so the order is stable.

/// Returns leaf indices in dendrogram order
pub fn single_linkage_order(dist: &[Vec<f64>]) -> Vec<usize> {
    let n = dist.len();
    if n == 0 {
        return Vec::new();
    }

    let d = |i: usize, j: usize| -> f64 {
        let a = dist[i].get(j).copied().unwrap_or(f64::INFINITY);
        let b = dist[j].get(i).copied().unwrap_or(f64::INFINITY);
        a.min(b)
    };

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    while clusters.len() > 1 {
        let mut best = (0, 1, f64::INFINITY);
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let link = clusters[a]
                    .iter()
                    .flat_map(|&i| clusters[b].iter().map(move |&j| (i, j)))
                    .map(|(i, j)| d(i, j))
                    .fold(f64::INFINITY, f64::min);
                if link < best.2 {
                    best = (a, b, link);
                }
            }
        }
        let (a, b, _) = best;
        let right = clusters.remove(b);
        clusters[a].extend(right);
    }
    clusters.pop().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_pairs_stay_adjacent() {
        let far = 10.0;
        // 0-2 close, 1-3 close
        let dist = vec![
            vec![0.0, far, 1.0, far],
            vec![far, 0.0, far, 2.0],
            vec![1.0, far, 0.0, far],
            vec![far, 2.0, far, 0.0],
        ];
        let order = single_linkage_order(&dist);
        assert_eq!(order.len(), 4);
        let pos = |x: usize| order.iter().position(|&o| o == x).unwrap();
        assert_eq!((pos(0) as i64 - pos(2) as i64).abs(), 1);
        assert_eq!((pos(1) as i64 - pos(3) as i64).abs(), 1);
    }

    #[test]
    fn test_asymmetric_uses_smaller_direction() {
        let dist = vec![
            vec![0.0, 9.0, 9.0],
            vec![9.0, 0.0, 9.0],
            vec![0.5, 9.0, 0.0],
        ];
        assert_eq!(single_linkage_order(&dist), vec![0, 2, 1]);
    }

    #[test]
    fn test_empty() {
        assert!(single_linkage_order(&[]).is_empty());
    }
}
