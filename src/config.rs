use config::{Config, ConfigError as SourceError, Environment, File as ConfigFile};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::log_entry::FormatMode;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

/// Width of every embedding vector.
pub const DIMENSIONS: usize = 384;
/// DBSCAN neighbourhood radius, in cosine distance.
pub const EPS: Number = 0.5;
/// DBSCAN density threshold, the point itself included.
pub const MIN_SAMPLES: usize = 3;
/// Pairs farther apart than this are never stored. Must stay >= `EPS`.
pub const MATERIALIZATION_CUTOFF: Number = 0.6;
pub const EMBED_BATCH_SIZE: usize = 32;
pub const DISTANCE_CHUNK_ROWS: usize = 500;
pub const MAX_ENTRIES_PER_FILE: usize = 1000;
pub const MAX_LOG_FILES: usize = 100;
pub const SAMPLE_LOGS_PER_CLUSTER: usize = 3;
pub const MIN_SUMMARY_CHARS: usize = 20;

const DEFAULT_LOG_DIRECTORY: &str = "./data/logs";
const DEFAULT_OUTPUT: &str = "clustered_logs.json";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_SUMMARY_MODEL: &str = "llama3.2";
const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";
const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Ollama,
    Hashing,
}

impl EmbeddingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingBackend::Ollama => "ollama",
            EmbeddingBackend::Hashing => "hashing",
        }
    }
}

impl FromStr for EmbeddingBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EmbeddingBackend::Ollama),
            "hashing" => Ok(EmbeddingBackend::Hashing),
            _ => Err(ConfigError::InvalidEmbeddingBackend {
                value: s.to_string(),
            }),
        }
    }
}

/// Raw values read from `logsieve_config.*` and `LOGSIEVE_*` variables.
#[derive(Deserialize, Default)]
pub struct LogsieveConfig {
    pub log_directory: Option<String>,
    pub log_format: Option<String>,
    pub ai_enhancement: Option<bool>,
    pub verbose: Option<bool>,
    pub output: Option<String>,
    pub ollama_url: Option<String>,
    pub summary_model: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_backend: Option<String>,
    pub summary_timeout_secs: Option<u64>,
}

impl LogsieveConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(LogsieveConfig {
            log_directory: optional(config, "log_directory")?,
            log_format: optional(config, "log_format")?,
            ai_enhancement: optional(config, "ai_enhancement")?,
            verbose: optional(config, "verbose")?,
            output: optional(config, "output")?,
            ollama_url: optional(config, "ollama_url")?,
            summary_model: optional(config, "summary_model")?,
            embedding_model: optional(config, "embedding_model")?,
            embedding_backend: optional(config, "embedding_backend")?,
            summary_timeout_secs: optional(config, "summary_timeout_secs")?,
        })
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("logsieve_config").required(false))
            .add_source(Environment::with_prefix("LOGSIEVE"))
            .build()?;
        Self::try_from(&config)
    }
}

/// An absent key is `None`; a key holding a value of the wrong type is an error.
fn optional<T: DeserializeOwned>(config: &Config, key: &str) -> Result<Option<T>, ConfigError> {
    match config.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(SourceError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Command-line values. They take precedence over file and environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub log_directory: Option<PathBuf>,
    pub log_format: Option<String>,
    pub disable_ai: bool,
    pub verbose: bool,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct State {
    pub log_directory: PathBuf,
    pub log_format: FormatMode,
    pub ai_enhancement: bool,
    pub verbose: bool,
    pub output: PathBuf,
    pub ollama_url: String,
    pub summary_model: String,
    pub embedding_model: String,
    pub embedding_backend: EmbeddingBackend,
    pub summary_timeout: Duration,
}

impl State {
    pub fn new(overrides: &Overrides) -> Result<Self, ConfigError> {
        let raw = LogsieveConfig::load()?;
        Self::resolve(raw, overrides)
    }

    pub fn resolve(raw: LogsieveConfig, overrides: &Overrides) -> Result<Self, ConfigError> {
        let log_directory = overrides
            .log_directory
            .clone()
            .or_else(|| raw.log_directory.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIRECTORY));

        let log_format = match overrides.log_format.as_deref().or(raw.log_format.as_deref()) {
            Some(value) => value.parse()?,
            None => FormatMode::Auto,
        };

        let ai_enhancement = !overrides.disable_ai && raw.ai_enhancement.unwrap_or(true);
        let verbose = overrides.verbose || raw.verbose.unwrap_or(false);

        let output = overrides
            .output
            .clone()
            .or_else(|| raw.output.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let embedding_backend = match raw.embedding_backend.as_deref() {
            Some(value) => value.parse()?,
            None => EmbeddingBackend::Ollama,
        };

        Ok(Self {
            log_directory,
            log_format,
            ai_enhancement,
            verbose,
            output,
            ollama_url: raw
                .ollama_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            summary_model: raw
                .summary_model
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            embedding_model: raw
                .embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_backend,
            summary_timeout: Duration::from_secs(
                raw.summary_timeout_secs
                    .unwrap_or(DEFAULT_SUMMARY_TIMEOUT_SECS),
            ),
        })
    }

    /// Defaults for everything except the directory. Ignores file and environment.
    pub fn for_directory(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            log_directory: log_directory.into(),
            log_format: FormatMode::Auto,
            ai_enhancement: true,
            verbose: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_backend: EmbeddingBackend::Ollama,
            summary_timeout: Duration::from_secs(DEFAULT_SUMMARY_TIMEOUT_SECS),
        }
    }

    pub fn print_config(&self) {
        println!("log_directory={}", self.log_directory.display());
        println!("log_format={}", self.log_format.as_str());
        println!("ai_enhancement={}", self.ai_enhancement);
        println!("verbose={}", self.verbose);
        println!("output={}", self.output.display());
        println!("ollama_url={}", self.ollama_url);
        println!("summary_model={}", self.summary_model);
        println!("embedding_model={}", self.embedding_model);
        println!("embedding_backend={}", self.embedding_backend.as_str());
        println!("summary_timeout_secs={}", self.summary_timeout.as_secs());
        println!("eps={}", EPS);
        println!("min_samples={}", MIN_SAMPLES);
        println!("materialization_cutoff={}", MATERIALIZATION_CUTOFF);
        println!("embed_batch_size={}", EMBED_BATCH_SIZE);
        println!("distance_chunk_rows={}", DISTANCE_CHUNK_ROWS);
        println!("max_entries_per_file={}", MAX_ENTRIES_PER_FILE);
    }
}
