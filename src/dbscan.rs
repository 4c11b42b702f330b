use std::collections::{BTreeMap, VecDeque};
use tracing::info;

use crate::config::Number;
use crate::distance::{Edge, NeighborGraph};

/// Label given to points that belong to no cluster.
pub const NOISE: i32 = -1;

/// Density-based clustering over a [`NeighborGraph`].
///
/// A point is a core point when at least `min_samples` points, itself
/// included, lie within `eps`. Clusters grow from core points through their
/// eps-neighbourhoods; non-core points reached this way become border points
/// of the first cluster that reaches them. Everything else is noise.
///
/// Points are scanned in index order and cluster ids are handed out in
/// order of discovery, so identical input always yields identical labels.
#[derive(Debug, Clone, Copy)]
pub struct Dbscan {
    eps: Number,
    min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: Number, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    pub fn fit<G: NeighborGraph>(&self, graph: &G) -> ClusterAssignment {
        let n = graph.len();
        if n <= 1 {
            return ClusterAssignment::all_noise(n);
        }

        let is_core: Vec<bool> = (0..n)
            .map(|i| eps_neighbors(graph.neighbors(i), self.eps).count() + 1 >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<i32>> = vec![None; n];
        let mut next_id = 0;
        let mut queue = VecDeque::new();

        for seed in 0..n {
            if labels[seed].is_some() || !is_core[seed] {
                continue;
            }
            let cluster = next_id;
            next_id += 1;
            labels[seed] = Some(cluster);
            queue.push_back(seed);

            while let Some(point) = queue.pop_front() {
                for neighbor in eps_neighbors(graph.neighbors(point), self.eps) {
                    if labels[neighbor].is_none() {
                        labels[neighbor] = Some(cluster);
                        if is_core[neighbor] {
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        let assignment = ClusterAssignment {
            labels: labels.into_iter().map(|l| l.unwrap_or(NOISE)).collect(),
        };
        info!(
            "DBSCAN found {} clusters and {} noise points among {} entries",
            assignment.n_clusters(),
            assignment.noise_count(),
            n
        );
        assignment
    }
}

fn eps_neighbors(edges: &[Edge], eps: Number) -> impl Iterator<Item = usize> + '_ {
    edges
        .iter()
        .filter(move |edge| edge.distance <= eps)
        .map(|edge| edge.target)
}

/// Cluster label of every entry, indexed by corpus position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub cluster_id: i32,
    /// Corpus positions, ascending.
    pub member_indices: Vec<usize>,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.member_indices.len()
    }

    pub fn is_noise(&self) -> bool {
        self.cluster_id == NOISE
    }
}

impl ClusterAssignment {
    pub fn all_noise(n: usize) -> Self {
        Self {
            labels: vec![NOISE; n],
        }
    }

    pub fn from_labels(labels: Vec<i32>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE).count()
    }

    pub fn n_clusters(&self) -> usize {
        self.labels
            .iter()
            .copied()
            .max()
            .map_or(0, |max| (max + 1).max(0) as usize)
    }

    /// Size per cluster id. The noise id is always present.
    pub fn cluster_sizes(&self) -> BTreeMap<i32, usize> {
        let mut sizes = BTreeMap::from([(NOISE, 0)]);
        for &label in &self.labels {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }

    /// All clusters ordered by id, noise first and always present.
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::from([(NOISE, Vec::new())]);
        for (index, &label) in self.labels.iter().enumerate() {
            members.entry(label).or_default().push(index);
        }
        members
            .into_iter()
            .map(|(cluster_id, member_indices)| Cluster {
                cluster_id,
                member_indices,
            })
            .collect()
    }
}
