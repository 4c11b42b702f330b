use rayon::prelude::*;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::config::Number;
use crate::dbscan::{ClusterAssignment, NOISE};
use crate::vector_ops::compute_cosine_distance_simd;

/// Mean silhouette coefficient (cosine distance) over non-noise points.
///
/// Distances are streamed one row at a time, so memory stays linear in the
/// number of points. Returns `None` when fewer than two clusters exist.
pub fn silhouette_score(embeddings: &[Vec<Number>], assignment: &ClusterAssignment) -> Option<f64> {
    if assignment.n_clusters() < 2 || embeddings.len() != assignment.len() {
        return None;
    }

    let labels = assignment.labels();
    let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] != NOISE).collect();

    let scores: Vec<f64> = members
        .par_iter()
        .map(|&i| {
            let mut totals: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
            for &j in members.iter().filter(|&&j| j != i) {
                let distance = compute_cosine_distance_simd(&embeddings[i], &embeddings[j]).unwrap_or(1.0);
                let slot = totals.entry(labels[j]).or_insert((0.0, 0));
                slot.0 += f64::from(distance);
                slot.1 += 1;
            }

            let own = match totals.get(&labels[i]) {
                Some(&(sum, count)) if count > 0 => sum / count as f64,
                _ => return 0.0,
            };
            let nearest = totals
                .iter()
                .filter(|&(&label, _)| label != labels[i])
                .map(|(_, &(sum, count))| sum / count as f64)
                .fold(f64::INFINITY, f64::min);

            let denominator = own.max(nearest);
            if denominator > 0.0 {
                (nearest - own) / denominator
            } else {
                0.0
            }
        })
        .collect();

    Some(scores.iter().mean())
}
