//! Column matching k-means over trials
//!
//! Each trial contributes `k` columns that are only defined up to
//! permutation. Clustering matches every trial's columns one-to-one to `k`
//! centroids by cosine similarity and takes the element-wise median of the
//! matched columns as the new centroid.

use crate::{Error, Result};
use ndarray::{s, Array2, Array3, ArrayView1, Axis};

/// Maximum assignment rounds
pub const MAX_ROUNDS: usize = 100;

/// Centroid movement below which clustering stops
pub const TOLERANCE: f64 = 1e-10;

/// Cluster the columns of a `(n, k, P)` trial stack
///
/// Returns the consensus factor `(n, k)` and the stack with every trial's
/// columns normalized and permuted so that column `c` of each trial belongs
/// to cluster `c`.
///
/// # Errors
/// Returns [`Error::Clustering`] for an empty stack, non-finite values, or
/// consensus columns that collapse onto each other when `k > 1`
pub fn cluster_columns(a_all: &Array3<f64>) -> Result<(Array2<f64>, Array3<f64>)> {
    let (n, k, p_total) = a_all.dim();
    if n == 0 || k == 0 || p_total == 0 {
        return Err(Error::Clustering(format!(
            "cannot cluster an empty stack of shape ({n}, {k}, {p_total})"
        )));
    }
    if a_all.iter().any(|v| !v.is_finite()) {
        return Err(Error::Clustering("trial factors contain non-finite values".to_string()));
    }

    let mut normalized = a_all.clone();
    for mut column in normalized.lanes_mut(Axis(0)) {
        let len = column.dot(&column).sqrt();
        if len > 0.0 {
            column.mapv_inplace(|x| x / len);
        }
    }

    let mut centroids = normalized.slice(s![.., .., 0]).to_owned();
    let mut clustered = normalized.clone();

    for _ in 0..MAX_ROUNDS {
        for p in 0..p_total {
            let trial = normalized.slice(s![.., .., p]);
            let similarity: Array2<f64> = ndarray::linalg::Dot::dot(&*centroids.t(), &*trial);
            for (cluster, column) in greedy_match(&similarity) {
                clustered
                    .slice_mut(s![.., cluster, p])
                    .assign(&trial.column(column));
            }
        }

        let updated = median_over_trials(&clustered);
        let shift = (&updated - &centroids).mapv(|x| x * x).sum().sqrt();
        centroids = updated;
        if shift < TOLERANCE {
            break;
        }
    }

    if k > 1 && has_collapsed_columns(&centroids) {
        return Err(Error::Clustering(
            "consensus columns are identical; the trials do not separate into k groups".to_string(),
        ));
    }

    Ok((centroids, clustered))
}

/// One-to-one assignment of columns to clusters, best similarity first
///
/// `similarity[[c, j]]` scores column `j` against cluster `c`. Returns
/// `(cluster, column)` pairs.
pub(crate) fn greedy_match(similarity: &Array2<f64>) -> Vec<(usize, usize)> {
    let k = similarity.nrows();
    let mut pairs: Vec<(usize, usize)> = (0..k)
        .flat_map(|c| (0..k).map(move |j| (c, j)))
        .collect();
    pairs.sort_by(|&(c1, j1), &(c2, j2)| {
        similarity[[c2, j2]]
            .total_cmp(&similarity[[c1, j1]])
            .then((c1, j1).cmp(&(c2, j2)))
    });

    let mut cluster_taken = vec![false; k];
    let mut column_taken = vec![false; k];
    let mut matched = Vec::with_capacity(k);
    for (c, j) in pairs {
        if cluster_taken[c] || column_taken[j] {
            continue;
        }
        cluster_taken[c] = true;
        column_taken[j] = true;
        matched.push((c, j));
        if matched.len() == k {
            break;
        }
    }
    matched
}

fn median_over_trials(stack: &Array3<f64>) -> Array2<f64> {
    let (n, k, _) = stack.dim();
    Array2::from_shape_fn((n, k), |(i, c)| median(stack.slice(s![i, c, ..])))
}

fn median(values: ArrayView1<'_, f64>) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn has_collapsed_columns(centroids: &Array2<f64>) -> bool {
    let k = centroids.ncols();
    (0..k).any(|a| {
        ((a + 1)..k).any(|b| {
            centroids
                .column(a)
                .iter()
                .zip(centroids.column(b).iter())
                .all(|(x, y)| (x - y).abs() <= TOLERANCE)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Two clean clusters, columns swapped in every other trial
    fn swapped_stack(p_total: usize) -> Array3<f64> {
        let base = array![[1.0, 0.0], [1.0, 0.1], [0.0, 1.0], [0.1, 1.0]];
        let mut stack = Array3::zeros((4, 2, p_total));
        for p in 0..p_total {
            let noise = 1.0 + 0.01 * p as f64;
            let mut trial = base.mapv(|x| x * noise);
            if p % 2 == 1 {
                trial.invert_axis(Axis(1));
            }
            stack.slice_mut(s![.., .., p]).assign(&trial);
        }
        stack
    }

    #[test]
    fn test_greedy_match_is_one_to_one() {
        let similarity = array![[0.1, 0.9, 0.3], [0.8, 0.7, 0.2], [0.5, 0.6, 0.4]];
        let mut matched = greedy_match(&similarity);
        matched.sort_unstable();
        assert_eq!(matched, vec![(0, 1), (1, 0), (2, 2)]);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(array![3.0, 1.0, 2.0].view()), 2.0);
        assert_eq!(median(array![4.0, 1.0, 3.0, 2.0].view()), 2.5);
    }

    #[test]
    fn test_clustering_undoes_permutations() {
        let stack = swapped_stack(6);
        let (consensus, clustered) = cluster_columns(&stack).unwrap();
        assert_eq!(consensus.dim(), (4, 2));
        for p in 0..6 {
            // cluster 0 tracks trial 0's first column
            assert!(clustered[[0, 0, p]] > clustered[[2, 0, p]]);
            assert!(clustered[[2, 1, p]] > clustered[[0, 1, p]]);
        }
    }

    #[test]
    fn test_clustered_columns_are_unit_length() {
        let (_, clustered) = cluster_columns(&swapped_stack(3)).unwrap();
        for column in clustered.lanes(Axis(0)) {
            assert!((column.dot(&column) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_empty_and_non_finite_rejected() {
        assert!(cluster_columns(&Array3::zeros((4, 2, 0))).is_err());
        let mut stack = swapped_stack(2);
        stack[[0, 0, 0]] = f64::NAN;
        assert!(matches!(cluster_columns(&stack), Err(Error::Clustering(_))));
    }

    #[test]
    fn test_identical_columns_rejected() {
        let stack = Array3::from_elem((3, 2, 4), 1.0);
        assert!(matches!(cluster_columns(&stack), Err(Error::Clustering(_))));
    }

    #[test]
    fn test_single_column_allowed() {
        let stack = Array3::from_elem((3, 1, 4), 2.0);
        let (consensus, _) = cluster_columns(&stack).unwrap();
        assert_eq!(consensus.dim(), (3, 1));
    }
}
