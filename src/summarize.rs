use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::MIN_SUMMARY_CHARS;
use crate::log_entry::SourceFormat;

const FALLBACK_PROBLEM: &str = "General cluster pattern";
const FALLBACK_SOLUTION: &str = "Review logs for further investigation.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRequest {
    pub cluster_id: i32,
    pub log_count: usize,
    pub sample_logs: Vec<String>,
    pub log_format: SourceFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_name: String,
    pub summary: String,
    pub problem: String,
    pub solution: String,
}

impl ClusterSummary {
    pub fn fallback(cluster_id: i32, log_count: usize) -> Self {
        Self {
            cluster_name: format!("Cluster {}", cluster_id),
            summary: format!(
                "Cluster {} contains {} logs with varied content.",
                cluster_id, log_count
            ),
            problem: FALLBACK_PROBLEM.to_string(),
            solution: FALLBACK_SOLUTION.to_string(),
        }
    }
}

/// A file-wide observation picked out by the summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub log: String,
    pub explanation: String,
    pub suggestions: String,
}

/// Turns cluster samples into human-readable explanations.
pub trait Summarizer: Send + Sync {
    fn model_name(&self) -> &str;
    fn summarize(&self, request: &SummaryRequest) -> Result<ClusterSummary>;
    fn alerts(&self, requests: &[SummaryRequest]) -> Result<Vec<Alert>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub summary: ClusterSummary,
    pub ai_summarized: bool,
}

impl SummaryOutcome {
    pub fn fallback(request: &SummaryRequest) -> Self {
        Self {
            summary: ClusterSummary::fallback(request.cluster_id, request.log_count),
            ai_summarized: false,
        }
    }
}

/// Wraps a [`Summarizer`] so every call is bounded by a timeout and never
/// fails: errors, timeouts and unusable answers all become the fallback.
pub struct GuardedSummarizer {
    inner: Arc<dyn Summarizer>,
    timeout: Duration,
}

impl GuardedSummarizer {
    pub fn new(inner: Arc<dyn Summarizer>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub fn summarize(&self, request: &SummaryRequest) -> SummaryOutcome {
        let inner = Arc::clone(&self.inner);
        let owned = request.clone();
        let result = call_with_timeout(self.timeout, move || inner.summarize(&owned))
            .and_then(|summary| validate(summary, request));

        match result {
            Ok(summary) => {
                debug!("Cluster {} summarized as '{}'", request.cluster_id, summary.cluster_name);
                SummaryOutcome {
                    summary,
                    ai_summarized: true,
                }
            }
            Err(e) => {
                warn!(
                    "Summary for cluster {} unavailable, using fallback: {:#}",
                    request.cluster_id, e
                );
                SummaryOutcome::fallback(request)
            }
        }
    }

    pub fn alerts(&self, requests: &[SummaryRequest]) -> Vec<Alert> {
        let inner = Arc::clone(&self.inner);
        let owned = requests.to_vec();
        match call_with_timeout(self.timeout, move || inner.alerts(&owned)) {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!("File-wide alerts unavailable: {:#}", e);
                Vec::new()
            }
        }
    }
}

fn validate(mut summary: ClusterSummary, request: &SummaryRequest) -> Result<ClusterSummary> {
    if summary.summary.trim().chars().count() < MIN_SUMMARY_CHARS {
        return Err(anyhow!("summary is too short or empty"));
    }
    let fallback = ClusterSummary::fallback(request.cluster_id, request.log_count);
    if summary.cluster_name.trim().is_empty() {
        summary.cluster_name = fallback.cluster_name;
    }
    if summary.problem.trim().is_empty() {
        summary.problem = fallback.problem;
    }
    if summary.solution.trim().is_empty() {
        summary.solution = fallback.solution;
    }
    Ok(summary)
}

/// Runs `call` on a worker thread and gives up after `timeout`. A call that
/// times out is abandoned; its result is discarded when it finishes.
fn call_with_timeout<T, F>(timeout: Duration, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("summarizer".to_string())
        .spawn(move || {
            let _ = tx.send(call());
        })
        .context("Failed to spawn summarizer thread")?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(anyhow!("timed out after {:?}", timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(anyhow!("summarizer thread panicked")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSummarizer {
        summary: ClusterSummary,
    }

    impl Summarizer for FixedSummarizer {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn summarize(&self, _request: &SummaryRequest) -> Result<ClusterSummary> {
            Ok(self.summary.clone())
        }

        fn alerts(&self, requests: &[SummaryRequest]) -> Result<Vec<Alert>> {
            Ok(requests
                .iter()
                .filter_map(|r| r.sample_logs.first())
                .map(|log| Alert {
                    log: log.clone(),
                    explanation: "seen".to_string(),
                    suggestions: "none".to_string(),
                })
                .collect())
        }
    }

    struct SlowSummarizer;

    impl Summarizer for SlowSummarizer {
        fn model_name(&self) -> &str {
            "slow"
        }

        fn summarize(&self, _request: &SummaryRequest) -> Result<ClusterSummary> {
            thread::sleep(Duration::from_secs(5));
            Ok(ClusterSummary::fallback(0, 0))
        }

        fn alerts(&self, _requests: &[SummaryRequest]) -> Result<Vec<Alert>> {
            thread::sleep(Duration::from_secs(5));
            Ok(Vec::new())
        }
    }

    struct PanickingSummarizer;

    impl Summarizer for PanickingSummarizer {
        fn model_name(&self) -> &str {
            "panicking"
        }

        fn summarize(&self, _request: &SummaryRequest) -> Result<ClusterSummary> {
            panic!("model crashed");
        }

        fn alerts(&self, _requests: &[SummaryRequest]) -> Result<Vec<Alert>> {
            anyhow::bail!("no alerts")
        }
    }

    fn request() -> SummaryRequest {
        SummaryRequest {
            cluster_id: 2,
            log_count: 14,
            sample_logs: vec!["sshd: authentication failure".to_string()],
            log_format: SourceFormat::Linux,
        }
    }

    fn good_summary() -> ClusterSummary {
        ClusterSummary {
            cluster_name: "Authentication Failures".to_string(),
            summary: "Repeated failed SSH logins for the root account.".to_string(),
            problem: "Brute-force attempts".to_string(),
            solution: "Enable fail2ban and disable root login.".to_string(),
        }
    }

    #[test]
    fn successful_summary_is_marked_ai() {
        let guarded = GuardedSummarizer::new(
            Arc::new(FixedSummarizer {
                summary: good_summary(),
            }),
            Duration::from_secs(5),
        );
        let outcome = guarded.summarize(&request());
        assert!(outcome.ai_summarized);
        assert_eq!(outcome.summary, good_summary());
    }

    #[test]
    fn short_summary_falls_back() {
        let mut summary = good_summary();
        summary.summary = "Too short".to_string();
        let guarded = GuardedSummarizer::new(Arc::new(FixedSummarizer { summary }), Duration::from_secs(5));

        let outcome = guarded.summarize(&request());
        assert!(!outcome.ai_summarized);
        assert_eq!(outcome.summary.cluster_name, "Cluster 2");
        assert_eq!(outcome.summary.summary, "Cluster 2 contains 14 logs with varied content.");
        assert_eq!(outcome.summary.problem, "General cluster pattern");
        assert_eq!(outcome.summary.solution, "Review logs for further investigation.");
    }

    #[test]
    fn blank_fields_are_filled_in() {
        let mut summary = good_summary();
        summary.cluster_name = " ".to_string();
        summary.solution = String::new();
        let guarded = GuardedSummarizer::new(Arc::new(FixedSummarizer { summary }), Duration::from_secs(5));

        let outcome = guarded.summarize(&request());
        assert!(outcome.ai_summarized);
        assert_eq!(outcome.summary.cluster_name, "Cluster 2");
        assert_eq!(outcome.summary.solution, "Review logs for further investigation.");
    }

    #[test]
    fn slow_summarizer_times_out_to_fallback() {
        let guarded = GuardedSummarizer::new(Arc::new(SlowSummarizer), Duration::from_millis(50));
        let outcome = guarded.summarize(&request());
        assert!(!outcome.ai_summarized);
        assert!(guarded.alerts(&[request()]).is_empty());
    }

    #[test]
    fn panicking_summarizer_falls_back() {
        let guarded = GuardedSummarizer::new(Arc::new(PanickingSummarizer), Duration::from_secs(5));
        assert_eq!(guarded.summarize(&request()), SummaryOutcome::fallback(&request()));
        assert!(guarded.alerts(&[request()]).is_empty());
    }

    #[test]
    fn alerts_pass_through() {
        let guarded = GuardedSummarizer::new(
            Arc::new(FixedSummarizer {
                summary: good_summary(),
            }),
            Duration::from_secs(5),
        );
        let alerts = guarded.alerts(&[request()]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].log, "sshd: authentication failure");
    }
}
