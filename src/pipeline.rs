use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{State, DISTANCE_CHUNK_ROWS, EMBED_BATCH_SIZE, EPS, MATERIALIZATION_CUTOFF, MAX_LOG_FILES, MIN_SAMPLES};
use crate::dbscan::Dbscan;
use crate::distance::DistanceBuilder;
use crate::embedding::{Embedder, EmbeddingGenerator};
use crate::error::{ConfigError, Diagnostics};
use crate::export::{ExportAssembler, ExportDocument, RunInfo};
use crate::ingest::{find_log_files, Ingestor};
use crate::insights::LineAnalyzer;
use crate::normalizer::Normalizer;
use crate::silhouette::silhouette_score;
use crate::summarize::GuardedSummarizer;

/// Checks the log directory and returns the files to analyze.
pub fn validate(state: &State) -> Result<Vec<PathBuf>, ConfigError> {
    let path = &state.log_directory;
    if !path.exists() {
        return Err(ConfigError::MissingDirectory { path: path.clone() });
    }
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory { path: path.clone() });
    }
    let files = find_log_files(path, MAX_LOG_FILES).map_err(|e| ConfigError::UnreadableDirectory {
        path: path.clone(),
        message: format!("{:#}", e),
    })?;
    if files.is_empty() {
        return Err(ConfigError::NoLogFiles { path: path.clone() });
    }
    info!("Found {} log files in {}", files.len(), path.display());
    Ok(files)
}

/// One analysis run: ingest, embed, cluster, summarize, assemble.
///
/// The embedder and summarizer are injected so tests can substitute
/// deterministic stubs.
pub struct Analyzer {
    normalizer: Normalizer,
    line_analyzer: LineAnalyzer,
    embedder: Arc<dyn Embedder>,
    summarizer: Option<GuardedSummarizer>,
}

impl Analyzer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self {
            normalizer: Normalizer::new()?,
            line_analyzer: LineAnalyzer::new()?,
            embedder,
            summarizer: None,
        })
    }

    pub fn with_summarizer(mut self, summarizer: GuardedSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Only configuration problems surface as errors. Every other failure
    /// is absorbed into the document's diagnostics or fallback fields.
    pub fn run(&self, state: &State) -> Result<ExportDocument, ConfigError> {
        let files = validate(state)?;
        let mut diagnostics = Diagnostics::default();

        let mut entries = Ingestor::new(&self.normalizer, state.log_format).ingest_files(&files, &mut diagnostics);

        let texts: Vec<String> = entries.iter().map(|entry| entry.canonical_text.clone()).collect();
        let embeddings = EmbeddingGenerator::new(self.embedder.as_ref(), EMBED_BATCH_SIZE).generate(&texts);
        for &position in &embeddings.low_confidence {
            entries[position].low_confidence = true;
        }
        diagnostics.low_confidence_embeddings = embeddings.low_confidence.len();

        let matrix = DistanceBuilder::new(MATERIALIZATION_CUTOFF, DISTANCE_CHUNK_ROWS)
            .build(&embeddings.vectors, &mut diagnostics);
        let assignment = Dbscan::new(EPS, MIN_SAMPLES).fit(&matrix);
        let silhouette = silhouette_score(&embeddings.vectors, &assignment);

        let insights = self.line_analyzer.analyze(&entries);

        let assembler = ExportAssembler::new(&entries, &assignment, state.log_format);
        let mut summaries = HashMap::new();
        let mut alerts = Vec::new();
        let mut summary_model = None;

        match (&self.summarizer, state.ai_enhancement) {
            (Some(summarizer), true) => {
                let requests = assembler.summary_requests();
                for request in &requests {
                    let outcome = summarizer.summarize(request);
                    if !outcome.ai_summarized {
                        diagnostics.summary_fallbacks += 1;
                    }
                    summaries.insert(request.cluster_id, outcome);
                }
                alerts = summarizer.alerts(&requests);
                summary_model = Some(summarizer.model_name());
            }
            (None, true) => warn!("AI enhancement requested but no summarizer is available"),
            _ => {}
        }

        if !diagnostics.is_clean() {
            warn!("Run finished with absorbed failures: {:?}", diagnostics);
        }

        Ok(assembler.assemble(
            RunInfo {
                log_directory: state.log_directory.clone(),
                log_format: state.log_format,
                total_files_searched: files.len(),
                embedding_backend: self.embedder.name().to_string(),
                retained_pairs: matrix.retained_pairs(),
                silhouette_score: silhouette,
                insights,
                diagnostics,
            },
            &summaries,
            alerts,
            summary_model,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn validate_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let state = State::for_directory(dir.path().join("absent"));
        assert!(matches!(validate(&state), Err(ConfigError::MissingDirectory { .. })));
    }

    #[test]
    fn validate_rejects_file_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.log");
        fs::write(&file, "line\n").unwrap();
        assert!(matches!(
            validate(&State::for_directory(&file)),
            Err(ConfigError::NotADirectory { .. })
        ));
    }

    #[test]
    fn validate_requires_log_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a log\n").unwrap();
        assert!(matches!(
            validate(&State::for_directory(dir.path())),
            Err(ConfigError::NoLogFiles { .. })
        ));

        fs::write(dir.path().join("app.log"), "a log\n").unwrap();
        assert_eq!(validate(&State::for_directory(dir.path())).unwrap().len(), 1);
    }
}
