use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source format a line was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Apache,
    Linux,
    Unknown,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Apache => "apache",
            SourceFormat::Linux => "linux",
            SourceFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-selected detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatMode {
    #[default]
    Auto,
    Apache,
    Linux,
}

impl FormatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatMode::Auto => "auto",
            FormatMode::Apache => "apache",
            FormatMode::Linux => "linux",
        }
    }

    /// The format every line is labelled with, when the mode forces one.
    pub fn forced_format(&self) -> Option<SourceFormat> {
        match self {
            FormatMode::Auto => None,
            FormatMode::Apache => Some(SourceFormat::Apache),
            FormatMode::Linux => Some(SourceFormat::Linux),
        }
    }
}

impl FromStr for FormatMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(FormatMode::Auto),
            "apache" => Ok(FormatMode::Apache),
            "linux" => Ok(FormatMode::Linux),
            _ => Err(ConfigError::InvalidLogFormat {
                value: s.to_string(),
            }),
        }
    }
}

/// One ingested log line.
///
/// `ingestion_index` is the position among the entries kept from
/// `source_file`, so it restarts at zero for every file. The corpus-wide
/// position is the entry's index in the ingested `Vec<LogEntry>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub raw_text: String,
    pub canonical_text: String,
    pub source_format: SourceFormat,
    pub source_file: PathBuf,
    pub ingestion_index: usize,
    pub timestamp: Option<NaiveDateTime>,
    pub low_confidence: bool,
}
