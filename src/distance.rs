//! Memory-bounded construction of the sparse cosine-distance graph.
//!
//! Rows are processed in fixed-size chunks. Each chunk computes the
//! distance from its rows to every column, keeps only pairs at or below the
//! materialization cutoff and discards the rest before the next chunk
//! starts, so peak memory is one chunk of candidate edges plus the retained
//! edges, never an N×N array.

use rayon::prelude::*;
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::config::Number;
use crate::error::Diagnostics;
use crate::vector_ops::compute_cosine_distance_simd;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub target: usize,
    pub distance: Number,
}

/// Read-only view of candidate neighbours, independent of storage.
pub trait NeighborGraph {
    fn len(&self) -> usize;

    /// Neighbours of `node`, sorted by target index. `node` itself is
    /// never listed.
    fn neighbors(&self, node: usize) -> &[Edge];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compressed sparse row storage of the retained distances.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseDistanceMatrix {
    indptr: Vec<usize>,
    edges: Vec<Edge>,
}

impl SparseDistanceMatrix {
    pub fn empty(n: usize) -> Self {
        Self {
            indptr: vec![0; n + 1],
            edges: Vec::new(),
        }
    }

    /// Number of stored directed edges. Each unordered pair counts twice.
    pub fn retained_pairs(&self) -> usize {
        self.edges.len()
    }

    /// Stored distance between `i` and `j`. The diagonal is implicitly zero.
    pub fn distance(&self, i: usize, j: usize) -> Option<Number> {
        if i == j {
            return Some(0.0);
        }
        let row = self.neighbors(i);
        row.binary_search_by_key(&j, |edge| edge.target)
            .ok()
            .map(|pos| row[pos].distance)
    }

    fn push_row(&mut self, row: Vec<Edge>) {
        self.edges.extend(row);
        self.indptr.push(self.edges.len());
    }
}

impl NeighborGraph for SparseDistanceMatrix {
    fn len(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    fn neighbors(&self, node: usize) -> &[Edge] {
        &self.edges[self.indptr[node]..self.indptr[node + 1]]
    }
}

struct RowResult {
    edges: Vec<Edge>,
    failures: usize,
}

pub struct DistanceBuilder {
    cutoff: Number,
    chunk_rows: usize,
}

impl DistanceBuilder {
    pub fn new(cutoff: Number, chunk_rows: usize) -> Self {
        Self {
            cutoff,
            chunk_rows: chunk_rows.max(1),
        }
    }

    pub fn build(&self, embeddings: &[Vec<Number>], diagnostics: &mut Diagnostics) -> SparseDistanceMatrix {
        let n = embeddings.len();
        if n <= 1 {
            return SparseDistanceMatrix::empty(n);
        }

        let mut matrix = SparseDistanceMatrix {
            indptr: Vec::with_capacity(n + 1),
            edges: Vec::new(),
        };
        matrix.indptr.push(0);

        let chunks = (0..n).step_by(self.chunk_rows).map(|start| start..(start + self.chunk_rows).min(n));
        let matrix = chunks.fold(matrix, |mut matrix, rows| {
            debug!("Computing distance rows {}..{}", rows.start, rows.end);
            for row in self.compute_chunk(embeddings, rows) {
                diagnostics.distance_failures += row.failures;
                matrix.push_row(row.edges);
            }
            matrix
        });

        if diagnostics.distance_failures > 0 {
            warn!(
                "{} pairs could not be compared and were left out",
                diagnostics.distance_failures
            );
        }
        info!(
            "Built sparse distance matrix: {} rows, {} retained edges (cutoff {})",
            n,
            matrix.retained_pairs(),
            self.cutoff
        );
        matrix
    }

    /// Rows are computed in parallel but collected in row order.
    fn compute_chunk(&self, embeddings: &[Vec<Number>], rows: Range<usize>) -> Vec<RowResult> {
        rows.into_par_iter()
            .map(|i| {
                let mut failures = 0;
                let edges = embeddings
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .filter_map(|(j, other)| {
                        match compute_cosine_distance_simd(&embeddings[i], other) {
                            Some(distance) => Some(Edge { target: j, distance }),
                            None => {
                                failures += 1;
                                None
                            }
                        }
                    })
                    .filter(|edge| edge.distance <= self.cutoff)
                    .collect();
                RowResult { edges, failures }
            })
            .collect()
    }
}
