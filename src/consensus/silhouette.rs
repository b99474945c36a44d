//! Cosine-distance silhouettes of clustered trial columns

use ndarray::{s, Array1, Array2, Array3, Axis};

/// Silhouette of every `(cluster, trial)` point, shape `(k, P)`
///
/// Points are the columns of the clustered stack; the distance between two
/// points is `1 − cos`. A single cluster scores `1.0` everywhere, and a point
/// whose intra- and nearest inter-cluster distances are both zero scores
/// `0.0`. With a single trial the clusters are singletons and score `0.0`.
#[must_use]
pub fn silhouettes(clustered: &Array3<f64>) -> Array2<f64> {
    let (n, k, p_total) = clustered.dim();
    if k == 1 {
        return Array2::ones((1, p_total));
    }
    if p_total <= 1 || n == 0 {
        return Array2::zeros((k, p_total));
    }

    // points ordered cluster-major: index c * P + p
    let mut points = Array2::<f64>::zeros((n, k * p_total));
    for c in 0..k {
        for p in 0..p_total {
            let column = clustered.slice(s![.., c, p]);
            let len = column.dot(&column).sqrt();
            let mut dst = points.column_mut(c * p_total + p);
            if len > 0.0 {
                dst.assign(&column.mapv(|x| x / len));
            }
        }
    }
    let distance = points
        .t()
        .dot(&points)
        .mapv(|cos| (1.0 - cos).clamp(0.0, 2.0));

    Array2::from_shape_fn((k, p_total), |(c, p)| {
        let row = distance.row(c * p_total + p);
        let mean_to = |cluster: usize| -> f64 {
            row.slice(s![cluster * p_total..(cluster + 1) * p_total]).sum()
        };

        #[allow(clippy::cast_precision_loss)]
        let intra = mean_to(c) / (p_total - 1) as f64;
        #[allow(clippy::cast_precision_loss)]
        let nearest = (0..k)
            .filter(|&other| other != c)
            .map(|other| mean_to(other) / p_total as f64)
            .fold(f64::INFINITY, f64::min);

        let scale = intra.max(nearest);
        if scale <= 0.0 {
            0.0
        } else {
            (nearest - intra) / scale
        }
    })
}

/// Stability scalars `(min, mean, std)` of the per-cluster mean silhouettes
#[must_use]
pub fn stability(sils: &Array2<f64>) -> (f64, f64, f64) {
    let Some(cluster_means) = sils.mean_axis(Axis(1)) else {
        return (0.0, 0.0, 0.0);
    };
    let min = cluster_means.iter().copied().fold(f64::INFINITY, f64::min);
    let (mean, std) = mean_std(&cluster_means);
    (min, mean, std)
}

/// Mean and population standard deviation
#[must_use]
pub fn mean_std(values: &Array1<f64>) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.mean().unwrap_or(0.0);
    (mean, values.std(0.0))
}
