//! Local outlier factor over a small in-memory point set.
//!
//! Matches the standard fit-and-predict formulation: each point's
//! neighbours exclude the point itself, reachability distance is
//! `max(k_distance(o), d(p, o))`, and the contamination threshold is the
//! matching percentile of the negative factors with linear interpolation.

use plantwatch_core::FeatureVector;
use rayon::prelude::*;

/// Guards the local reachability density against duplicate points.
const DENSITY_EPSILON: f64 = 1e-10;

/// Result of one LOF fit over a point set.
#[derive(Debug, Clone)]
pub struct LofResult {
    /// Local outlier factor per point, input order. 1.0 is typical density.
    pub factors: Vec<f64>,
    /// Points whose negative factor falls below the contamination percentile.
    pub outliers: Vec<bool>,
    /// The contamination percentile of the negative factors.
    pub offset: f64,
}

impl LofResult {
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// Fit LOF on `points` and label each one.
///
/// `k` is clamped to `points.len() - 1`. Fewer than two points cannot be
/// scored and give an empty result.
pub fn local_outlier_factor(points: &[FeatureVector], k: usize, contamination: f64) -> LofResult {
    let n = points.len();
    let k = k.min(n.saturating_sub(1));
    if n < 2 || k == 0 {
        return LofResult {
            factors: Vec::new(),
            outliers: Vec::new(),
            offset: 0.0,
        };
    }

    // k nearest neighbours of every point, nearest first.
    let neighbours: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut row: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, points[i].distance(&points[j])))
                .collect();
            row.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            row.truncate(k);
            row
        })
        .collect();

    let k_distance: Vec<f64> = neighbours.iter().map(|row| row[k - 1].1).collect();

    let density: Vec<f64> = neighbours
        .iter()
        .map(|row| {
            let reach = row
                .iter()
                .map(|&(j, d)| d.max(k_distance[j]))
                .sum::<f64>()
                / k as f64;
            1.0 / (reach + DENSITY_EPSILON)
        })
        .collect();

    let factors: Vec<f64> = neighbours
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let neighbour_density = row.iter().map(|&(j, _)| density[j]).sum::<f64>() / k as f64;
            neighbour_density / density[i]
        })
        .collect();

    let negative: Vec<f64> = factors.iter().map(|f| -f).collect();
    let offset = percentile(&negative, 100.0 * contamination);
    let outliers = negative.iter().map(|&nf| nf < offset).collect();

    LofResult {
        factors,
        outliers,
        offset,
    }
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
