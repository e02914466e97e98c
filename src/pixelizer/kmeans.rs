//! Deterministic K-means over RGB points.
//!
//! Seeds are supplied by the caller (interpolated between channel bounds,
//! never random), so identical input always gives identical clusters.

use tracing::trace;

use crate::color::distance_sq;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Convergence {
    /// Stop once no centroid moved farther than this (euclidean).
    MaxShift(f32),
    /// Stop once the summed per-channel absolute movement is below this.
    TotalShift(f32),
}

#[derive(Debug, Clone)]
pub(crate) struct Clusters {
    pub centroids: Vec<[f32; 3]>,
    /// Points assigned to each centroid in the final assignment.
    pub members: Vec<usize>,
    pub iterations: usize,
}

/// Index of the nearest centroid, the first one on ties.
#[inline]
pub(crate) fn nearest(centroids: &[[f32; 3]], point: [f32; 3]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, &c) in centroids.iter().enumerate() {
        let d = distance_sq(c, point);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

pub(crate) fn channel_bounds(points: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for p in points {
        for c in 0..3 {
            min[c] = min[c].min(p[c]);
            max[c] = max[c].max(p[c]);
        }
    }
    (min, max)
}

#[inline]
pub(crate) fn lerp(min: [f32; 3], max: [f32; 3], t: f32) -> [f32; 3] {
    [
        min[0] + (max[0] - min[0]) * t,
        min[1] + (max[1] - min[1]) * t,
        min[2] + (max[2] - min[2]) * t,
    ]
}

/// `t = i / (k - 1)`. A single seed sits halfway.
#[inline]
pub(crate) fn seed_t(i: usize, k: usize) -> f32 {
    if k <= 1 {
        0.5
    } else {
        i as f32 / (k - 1) as f32
    }
}

/// `k` seeds evenly spaced on the diagonal from `min` to `max`.
pub(crate) fn interpolated_seeds(min: [f32; 3], max: [f32; 3], k: usize) -> Vec<[f32; 3]> {
    (0..k).map(|i| lerp(min, max, seed_t(i, k))).collect()
}

/// Weighted Lloyd iterations. Each point adds its weight (1 when `weights`
/// is `None`) to its cluster; a cluster with zero total weight keeps its
/// previous centroid.
pub(crate) fn run(
    points: &[[f32; 3]],
    weights: Option<&[f32]>,
    seeds: Vec<[f32; 3]>,
    max_iterations: usize,
    convergence: Convergence,
) -> Clusters {
    let k = seeds.len();
    let mut centroids = seeds;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let mut sums = vec![[0f64; 3]; k];
        let mut totals = vec![0f64; k];
        for (i, &p) in points.iter().enumerate() {
            let w = weights.map_or(1.0, |w| w[i]) as f64;
            let cluster = nearest(&centroids, p);
            for c in 0..3 {
                sums[cluster][c] += p[c] as f64 * w;
            }
            totals[cluster] += w;
        }

        let mut max_shift = 0f32;
        let mut total_shift = 0f32;
        for j in 0..k {
            if totals[j] <= 0.0 {
                continue;
            }
            let updated = [
                (sums[j][0] / totals[j]) as f32,
                (sums[j][1] / totals[j]) as f32,
                (sums[j][2] / totals[j]) as f32,
            ];
            max_shift = max_shift.max(distance_sq(updated, centroids[j]).sqrt());
            total_shift += (0..3).map(|c| (updated[c] - centroids[j][c]).abs()).sum::<f32>();
            centroids[j] = updated;
        }
        trace!(iteration = iterations, max_shift, total_shift, "k-means step");

        let converged = match convergence {
            Convergence::MaxShift(limit) => max_shift <= limit,
            Convergence::TotalShift(limit) => total_shift < limit,
        };
        if converged {
            break;
        }
    }

    let mut members = vec![0usize; k];
    for &p in points {
        members[nearest(&centroids, p)] += 1;
    }

    Clusters {
        centroids,
        members,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_go_to_first_centroid() {
        let centroids = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        assert_eq!(nearest(&centroids, [1.0, 0.0, 0.0]), 0);
        assert_eq!(nearest(&centroids, [1.5, 0.0, 0.0]), 1);
    }

    #[test]
    fn seeds_span_bounds() {
        let seeds = interpolated_seeds([0.0, 10.0, 20.0], [100.0, 10.0, 40.0], 3);
        assert_eq!(seeds, vec![[0.0, 10.0, 20.0], [50.0, 10.0, 30.0], [100.0, 10.0, 40.0]]);
        assert_eq!(interpolated_seeds([0.0; 3], [100.0; 3], 1), vec![[50.0; 3]]);
    }

    #[test]
    fn separates_two_groups() {
        let mut points = vec![[10.0, 10.0, 10.0]; 5];
        points.extend(vec![[240.0, 240.0, 240.0]; 5]);
        let (min, max) = channel_bounds(&points);
        let clusters = run(
            &points,
            None,
            interpolated_seeds(min, max, 2),
            10,
            Convergence::MaxShift(1.0),
        );
        assert_eq!(clusters.centroids, vec![[10.0; 3], [240.0; 3]]);
        assert_eq!(clusters.members, vec![5, 5]);
    }

    #[test]
    fn zero_weight_cluster_keeps_seed() {
        let points = [[0.0; 3], [200.0; 3]];
        let weights = [0.0, 1.0];
        let clusters = run(
            &points,
            Some(&weights),
            vec![[10.0; 3], [190.0; 3]],
            50,
            Convergence::TotalShift(1.0 / 256.0),
        );
        assert_eq!(clusters.centroids[0], [10.0; 3]);
        assert_eq!(clusters.centroids[1], [200.0; 3]);
    }

    #[test]
    fn weights_pull_centroid() {
        let points = [[0.0; 3], [100.0; 3]];
        let weights = [3.0, 1.0];
        let clusters = run(
            &points,
            Some(&weights),
            vec![[50.0; 3]],
            50,
            Convergence::TotalShift(1.0 / 256.0),
        );
        assert_eq!(clusters.centroids, vec![[25.0; 3]]);
    }

    #[test]
    fn stops_at_iteration_cap() {
        let points: Vec<[f32; 3]> = (0..50).map(|i| [i as f32 * 5.0, 0.0, 0.0]).collect();
        let clusters = run(
            &points,
            None,
            vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            1,
            Convergence::TotalShift(0.0),
        );
        assert_eq!(clusters.iterations, 1);
    }
}
