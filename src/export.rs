//! Assembly and atomic serialization of the export document.
//!
//! Assembly is pure aggregation over already-computed results: it joins the
//! cluster assignment with the ingested entries and whatever summaries the
//! collaborator produced, filling every gap with the deterministic fallback.

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

use crate::config::SAMPLE_LOGS_PER_CLUSTER;
use crate::dbscan::{Cluster, ClusterAssignment};
use crate::error::Diagnostics;
use crate::insights::{ErrorPattern, Insights, Solution};
use crate::log_entry::{FormatMode, LogEntry, SourceFormat};
use crate::summarize::{Alert, SummaryOutcome, SummaryRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub alerts: Vec<Alert>,
    pub clusters: Vec<ClusterRecord>,
    pub metadata: Metadata,
    pub analysis: Analysis,
    pub ai_enhancement_used: bool,
    pub ollama_model_used: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub cluster_id: i32,
    pub log_count: usize,
    pub cluster: String,
    pub summary: String,
    pub problem: String,
    pub solution: String,
    pub original_logs: Vec<String>,
    pub ai_summarized: bool,
    pub log_format: SourceFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: String,
    pub log_directory: PathBuf,
    pub log_format: FormatMode,
    pub total_files_searched: usize,
    pub total_logs: usize,
    pub n_clusters: usize,
    pub n_noise: usize,
    pub embedding_backend: String,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub total_entries: usize,
    pub cluster_sizes: BTreeMap<i32, usize>,
    pub format_distribution: BTreeMap<String, usize>,
    pub retained_pairs: usize,
    pub time_pattern: Option<TimePattern>,
    pub silhouette_score: Option<f64>,
    pub severity_distribution: BTreeMap<String, usize>,
    pub components: BTreeMap<String, usize>,
    pub error_patterns: Vec<ErrorPattern>,
    pub solutions: Vec<Solution>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePattern {
    pub first_occurrence: NaiveDateTime,
    pub last_occurrence: NaiveDateTime,
    pub total_occurrences: usize,
}

/// Facts about the run that are not derived from the clustering itself.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub log_directory: PathBuf,
    pub log_format: FormatMode,
    pub total_files_searched: usize,
    pub embedding_backend: String,
    pub retained_pairs: usize,
    pub silhouette_score: Option<f64>,
    pub insights: Insights,
    pub diagnostics: Diagnostics,
}

pub struct ExportAssembler<'a> {
    entries: &'a [LogEntry],
    assignment: &'a ClusterAssignment,
    mode: FormatMode,
}

impl<'a> ExportAssembler<'a> {
    pub fn new(entries: &'a [LogEntry], assignment: &'a ClusterAssignment, mode: FormatMode) -> Self {
        Self {
            entries,
            assignment,
            mode,
        }
    }

    /// One request per non-empty cluster, noise included.
    pub fn summary_requests(&self) -> Vec<SummaryRequest> {
        self.assignment
            .clusters()
            .iter()
            .filter(|cluster| cluster.size() > 0)
            .map(|cluster| SummaryRequest {
                cluster_id: cluster.cluster_id,
                log_count: cluster.size(),
                sample_logs: cluster
                    .member_indices
                    .iter()
                    .take(SAMPLE_LOGS_PER_CLUSTER)
                    .map(|&i| self.entries[i].raw_text.clone())
                    .collect(),
                log_format: self.cluster_format(cluster),
            })
            .collect()
    }

    /// Forced format when the mode forces one, else the majority format.
    /// Ties go to the format that sorts first (apache, linux, unknown).
    pub fn cluster_format(&self, cluster: &Cluster) -> SourceFormat {
        if let Some(format) = self.mode.forced_format() {
            return format;
        }
        let mut counts: BTreeMap<SourceFormat, usize> = BTreeMap::new();
        for &i in &cluster.member_indices {
            *counts.entry(self.entries[i].source_format).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .fold(None, |best: Option<(SourceFormat, usize)>, (format, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((format, count)),
            })
            .map_or(SourceFormat::Unknown, |(format, _)| format)
    }

    pub fn assemble(
        &self,
        run: RunInfo,
        summaries: &HashMap<i32, SummaryOutcome>,
        alerts: Vec<Alert>,
        summary_model: Option<&str>,
    ) -> ExportDocument {
        let clusters: Vec<ClusterRecord> = self
            .assignment
            .clusters()
            .iter()
            .map(|cluster| {
                let outcome = summaries.get(&cluster.cluster_id).cloned().unwrap_or_else(|| {
                    SummaryOutcome::fallback(&SummaryRequest {
                        cluster_id: cluster.cluster_id,
                        log_count: cluster.size(),
                        sample_logs: Vec::new(),
                        log_format: SourceFormat::Unknown,
                    })
                });
                ClusterRecord {
                    cluster_id: cluster.cluster_id,
                    log_count: cluster.size(),
                    cluster: outcome.summary.cluster_name,
                    summary: outcome.summary.summary,
                    problem: outcome.summary.problem,
                    solution: outcome.summary.solution,
                    original_logs: cluster
                        .member_indices
                        .iter()
                        .map(|&i| self.entries[i].raw_text.clone())
                        .collect(),
                    ai_summarized: outcome.ai_summarized,
                    log_format: self.cluster_format(cluster),
                }
            })
            .collect();

        let ai_enhancement_used = summary_model.is_some() && clusters.iter().any(|c| c.ai_summarized);

        let mut format_distribution = BTreeMap::new();
        for entry in self.entries {
            *format_distribution
                .entry(entry.source_format.as_str().to_string())
                .or_insert(0) += 1;
        }

        ExportDocument {
            alerts,
            metadata: Metadata {
                timestamp: Utc::now().to_rfc3339(),
                log_directory: run.log_directory,
                log_format: run.log_format,
                total_files_searched: run.total_files_searched,
                total_logs: self.entries.len(),
                n_clusters: self.assignment.n_clusters(),
                n_noise: self.assignment.noise_count(),
                embedding_backend: run.embedding_backend,
                diagnostics: run.diagnostics,
            },
            analysis: Analysis {
                total_entries: self.entries.len(),
                cluster_sizes: self.assignment.cluster_sizes(),
                format_distribution,
                retained_pairs: run.retained_pairs,
                time_pattern: time_pattern(self.entries),
                silhouette_score: run.silhouette_score,
                severity_distribution: run.insights.severity_distribution,
                components: run.insights.components,
                error_patterns: run.insights.error_patterns,
                solutions: run.insights.solutions,
            },
            clusters,
            ai_enhancement_used,
            ollama_model_used: summary_model.filter(|_| ai_enhancement_used).map(str::to_string),
        }
    }
}

/// First and last parsed timestamp. Entries without one are skipped.
pub fn time_pattern(entries: &[LogEntry]) -> Option<TimePattern> {
    let mut timestamps = entries.iter().filter_map(|entry| entry.timestamp);
    let first = timestamps.next()?;
    let (first_occurrence, last_occurrence, total_occurrences) =
        timestamps.fold((first, first, 1), |(min, max, count), ts| (min.min(ts), max.max(ts), count + 1));
    Some(TimePattern {
        first_occurrence,
        last_occurrence,
        total_occurrences,
    })
}

/// Serializes `document` next to `path` and renames it into place, so a
/// reader never observes a partially written file.
pub fn write_atomic(document: &ExportDocument, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in '{}'", parent.display()))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, document).context("Failed to serialize export document")?;
        writer.flush().context("Failed to flush export document")?;
    }
    temp.as_file().sync_all().context("Failed to sync export document")?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move export document to '{}'", path.display()))?;
    info!("Results saved to {}", path.display());
    Ok(())
}
