use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::{Number, SAMPLE_LOGS_PER_CLUSTER};
use crate::embedding::Embedder;
use crate::summarize::{Alert, ClusterSummary, Summarizer, SummaryRequest};

const PING_TIMEOUT_SECONDS: u64 = 5;

/// Thin JSON-over-HTTP client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<Number>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SummaryReply {
    cluster: String,
    summary: String,
    problem: String,
    solution: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Checks that the server answers at all.
    pub fn ping(&self) -> Result<()> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(PING_TIMEOUT_SECONDS)))
            .build()
            .into();
        let url = self.url("/api/tags");
        debug!("Pinging Ollama server at {}", url);
        agent
            .get(&url)
            .call()
            .with_context(|| format!("Ollama server at {} is not reachable", self.base_url))?;
        Ok(())
    }

    fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.url(path);
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;
        let response_text = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .with_context(|| format!("Request to {} failed", url))?;
        serde_json::from_str(&response_text).with_context(|| format!("Failed to parse response from {}", url))
    }
}

pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    label: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: &str, dimensions: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            label: format!("ollama/{}", model),
            dimensions,
        }
    }

    pub fn ping(&self) -> Result<()> {
        self.client.ping()
    }
}

impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.label
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        let response: EmbedResponse = self.client.post_json(
            "/api/embed",
            &EmbedRequest {
                model: &self.model,
                input: texts,
            },
        )?;
        Ok(response.embeddings)
    }
}

pub struct OllamaSummarizer {
    client: OllamaClient,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    fn generate(&self, prompt: String) -> Result<String> {
        let response: GenerateResponse = self.client.post_json(
            "/api/generate",
            &GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                format: "json",
            },
        )?;
        Ok(strip_code_fence(&response.response).to_string())
    }
}

impl Summarizer for OllamaSummarizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn summarize(&self, request: &SummaryRequest) -> Result<ClusterSummary> {
        let reply = self.generate(cluster_prompt(request))?;
        parse_summary(&reply)
    }

    fn alerts(&self, requests: &[SummaryRequest]) -> Result<Vec<Alert>> {
        let reply = self.generate(alerts_prompt(requests))?;
        parse_alerts(&reply)
    }
}

fn sample_block(request: &SummaryRequest) -> String {
    request
        .sample_logs
        .iter()
        .take(SAMPLE_LOGS_PER_CLUSTER)
        .map(|log| format!("- {}", log))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cluster_prompt(request: &SummaryRequest) -> String {
    format!(
        "You are a log analyst for {format} logs. The following lines were grouped into \
cluster {id}, which holds {count} log entries.\n\
Sample logs:\n{samples}\n\n\
Reply with a JSON object with exactly these keys:\n\
\"cluster\": a short title for the cluster,\n\
\"summary\": one or two sentences describing what the logs show,\n\
\"problem\": the underlying issue, if any,\n\
\"solution\": a concrete next step for an operator.",
        format = request.log_format,
        id = request.cluster_id,
        count = request.log_count,
        samples = sample_block(request),
    )
}

fn alerts_prompt(requests: &[SummaryRequest]) -> String {
    let clusters = requests
        .iter()
        .map(|r| format!("Cluster {} ({} logs):\n{}", r.cluster_id, r.log_count, sample_block(r)))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are reviewing clustered system logs.\n{clusters}\n\n\
Pick out the log lines that need an operator's attention. Reply with a JSON array of objects \
with the keys \"log\", \"explanation\" and \"suggestions\". Reply with [] when nothing stands out.",
        clusters = clusters,
    )
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.trim_start_matches("json");
            body.strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}

fn parse_summary(reply: &str) -> Result<ClusterSummary> {
    let parsed: SummaryReply = serde_json::from_str(reply).context("Summary reply is not a JSON object")?;
    Ok(ClusterSummary {
        cluster_name: parsed.cluster,
        summary: parsed.summary,
        problem: parsed.problem,
        solution: parsed.solution,
    })
}

/// Accepts a bare array or an object wrapping one under `alerts`.
fn parse_alerts(reply: &str) -> Result<Vec<Alert>> {
    let value: Value = serde_json::from_str(reply).context("Alerts reply is not JSON")?;
    let list = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("alerts")
            .ok_or_else(|| anyhow!("Alerts reply has no 'alerts' key"))?,
        other => return Err(anyhow!("Unexpected alerts reply: {}", other)),
    };
    serde_json::from_value(list).context("Alerts reply has an invalid shape")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::SourceFormat;

    fn request() -> SummaryRequest {
        SummaryRequest {
            cluster_id: 0,
            log_count: 42,
            sample_logs: vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
            ],
            log_format: SourceFormat::Apache,
        }
    }

    #[test]
    fn prompt_carries_cluster_facts_and_three_samples() {
        let prompt = cluster_prompt(&request());
        assert!(prompt.contains("cluster 0"));
        assert!(prompt.contains("42 log entries"));
        assert!(prompt.contains("apache logs"));
        assert!(prompt.contains("- c"));
        assert!(!prompt.contains("- d"));
    }

    #[test]
    fn summary_reply_with_missing_fields_parses() {
        let summary = parse_summary(r#"{"cluster": "JK errors", "summary": "mod_jk fails to create channels"}"#).unwrap();
        assert_eq!(summary.cluster_name, "JK errors");
        assert_eq!(summary.problem, "");
    }

    #[test]
    fn fenced_reply_is_unwrapped() {
        let reply = "```json\n{\"cluster\": \"x\"}\n```";
        assert_eq!(strip_code_fence(reply), "{\"cluster\": \"x\"}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }

    #[test]
    fn alerts_accept_array_or_wrapper() {
        let bare = r#"[{"log": "disk full", "explanation": "no space", "suggestions": "clean /var"}]"#;
        assert_eq!(parse_alerts(bare).unwrap().len(), 1);

        let wrapped = r#"{"alerts": [{"log": "x", "explanation": "y", "suggestions": "z"}]}"#;
        assert_eq!(parse_alerts(wrapped).unwrap()[0].suggestions, "z");

        assert!(parse_alerts(r#"[{"log": "missing keys"}]"#).is_err());
        assert!(parse_alerts("\"nothing\"").is_err());
    }

    #[test]
    fn unreachable_server_fails_ping() {
        let client = OllamaClient::new("http://127.0.0.1:9/", Duration::from_millis(200));
        assert_eq!(client.url("/api/tags"), "http://127.0.0.1:9/api/tags");
        assert!(client.ping().is_err());
    }
}
