//! Line-level facts reported next to the clustering: severity counts,
//! emitting components, recurring error messages and rule-based hints.
//!
//! Parsing runs over the canonical text, so the format headers are already
//! gone. A severity keyword is required before a component is looked for;
//! the component is either a leading `[name]` or the text before the first
//! colon.

use anyhow::{Context, Result};
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::log_entry::LogEntry;

const ISO_TIMESTAMP: &str = r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}";
const SEVERITY: &str = r"(?i)\b(ERROR|INFO|WARNING|DEBUG|CRITICAL|WARN|FATAL)\b";
const COMPONENT: &str = r"^\[(?P<bracketed>[^\]]+)\]|^(?P<prefix>[^:]+):";
const UUID: &str = r"\b[a-f0-9]{8}(?:-[a-f0-9]{4}){3}-[a-f0-9]{12}\b";
const NUMBER: &str = r"\d+";

pub const UNKNOWN_SEVERITY: &str = "UNKNOWN";
pub const MAX_ERROR_PATTERNS: usize = 10;
/// Messages this short or shorter say too little to be a pattern.
const MIN_PATTERN_MESSAGE_CHARS: usize = 10;
const ERROR_SEVERITIES: [&str; 3] = ["ERROR", "CRITICAL", "FATAL"];

struct Rule {
    keywords: &'static [&'static str],
    problem: &'static str,
    solution: &'static str,
}

const RULES: [Rule; 4] = [
    Rule {
        keywords: &["connection", "timeout", "connect"],
        problem: "Connection issues",
        solution: "Check network connectivity between services and verify that all dependent services are running. Look for firewall or DNS issues.",
    },
    Rule {
        keywords: &["permission", "access", "denied"],
        problem: "Permission issues",
        solution: "Verify file and resource permissions. Check that service accounts have the necessary access rights.",
    },
    Rule {
        keywords: &["memory", "cpu", "capacity", "full"],
        problem: "Resource constraints",
        solution: "Check system resources (memory, CPU, disk space). Consider scaling up infrastructure or optimizing resource usage.",
    },
    Rule {
        keywords: &["database", "db", "sql", "query"],
        problem: "Database issues",
        solution: "Check database connectivity, query performance, and database logs. Verify that database indices are properly set up.",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFields {
    pub severity: String,
    pub component: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub component: String,
    pub pattern: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub problem: String,
    pub solution: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Insights {
    pub severity_distribution: BTreeMap<String, usize>,
    pub components: BTreeMap<String, usize>,
    pub error_patterns: Vec<ErrorPattern>,
    pub solutions: Vec<Solution>,
}

pub struct LineAnalyzer {
    iso_timestamp: Regex,
    severity: Regex,
    component: Regex,
    uuid: Regex,
    number: Regex,
}

impl LineAnalyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            iso_timestamp: compile(ISO_TIMESTAMP)?,
            severity: compile(SEVERITY)?,
            component: compile(COMPONENT)?,
            uuid: compile(UUID)?,
            number: compile(NUMBER)?,
        })
    }

    pub fn parse(&self, line: &str) -> LineFields {
        let remainder = match self.iso_timestamp.find(line).ok().flatten() {
            Some(ts) => line[ts.end()..].trim(),
            None => line,
        };

        let Some(severity) = self.severity.find(line).ok().flatten() else {
            return LineFields {
                severity: UNKNOWN_SEVERITY.to_string(),
                component: None,
                message: remainder.to_string(),
            };
        };

        let rest = self.without_severity(remainder);
        let rest = rest.trim();
        let (component, message) = match self.component.captures(rest).ok().flatten() {
            Some(caps) => {
                let name = caps.name("bracketed").or_else(|| caps.name("prefix"));
                let end = caps.get(0).map_or(0, |m| m.end());
                (name.map(|m| m.as_str().trim().to_string()), rest[end..].trim().to_string())
            }
            None => (None, rest.to_string()),
        };

        LineFields {
            severity: severity.as_str().to_ascii_uppercase(),
            component,
            message,
        }
    }

    /// Drops the first severity keyword, and the brackets around it when it
    /// is written as `[error]`.
    fn without_severity(&self, text: &str) -> String {
        let Some(m) = self.severity.find(text).ok().flatten() else {
            return text.to_string();
        };
        let (mut start, mut end) = (m.start(), m.end());
        if text[..start].ends_with('[') && text[end..].starts_with(']') {
            start -= 1;
            end += 1;
        }
        format!("{}{}", &text[..start], &text[end..])
    }

    /// Replaces UUIDs with `<ID>` and digit runs with `<NUM>`.
    pub fn mask(&self, message: &str) -> String {
        let masked = self.uuid.replace_all(message, "<ID>");
        self.number.replace_all(&masked, "<NUM>").into_owned()
    }

    pub fn analyze(&self, entries: &[LogEntry]) -> Insights {
        let mut severity_distribution = BTreeMap::new();
        let mut components = BTreeMap::new();
        // First-seen order breaks count ties among error patterns.
        let mut pattern_order: Vec<(String, String)> = Vec::new();
        let mut pattern_counts: HashMap<(String, String), usize> = HashMap::new();

        for entry in entries {
            let fields = self.parse(&entry.canonical_text);
            *severity_distribution.entry(fields.severity.clone()).or_insert(0) += 1;

            let Some(component) = fields.component else {
                continue;
            };
            *components.entry(component.clone()).or_insert(0) += 1;

            if ERROR_SEVERITIES.contains(&fields.severity.as_str())
                && fields.message.chars().count() > MIN_PATTERN_MESSAGE_CHARS
            {
                let key = (component, self.mask(&fields.message));
                let count = pattern_counts.entry(key.clone()).or_insert(0);
                if *count == 0 {
                    pattern_order.push(key);
                }
                *count += 1;
            }
        }

        let mut error_patterns: Vec<ErrorPattern> = pattern_order
            .into_iter()
            .map(|key| {
                let count = pattern_counts.get(&key).copied().unwrap_or(0);
                let (component, pattern) = key;
                ErrorPattern {
                    component,
                    pattern,
                    count,
                }
            })
            .collect();
        error_patterns.sort_by(|a, b| b.count.cmp(&a.count));
        error_patterns.truncate(MAX_ERROR_PATTERNS);

        let solutions = suggest_solutions(entries.len(), &components, &error_patterns);
        Insights {
            severity_distribution,
            components,
            error_patterns,
            solutions,
        }
    }
}

/// Keyword rules over the error patterns. When none fires, the busiest
/// component is pointed at instead.
pub fn suggest_solutions(
    total_entries: usize,
    components: &BTreeMap<String, usize>,
    error_patterns: &[ErrorPattern],
) -> Vec<Solution> {
    let lowered: Vec<String> = error_patterns.iter().map(|p| p.pattern.to_lowercase()).collect();
    let mut solutions: Vec<Solution> = RULES
        .iter()
        .filter(|rule| {
            lowered
                .iter()
                .any(|pattern| rule.keywords.iter().any(|keyword| pattern.contains(keyword)))
        })
        .map(|rule| Solution {
            problem: rule.problem.to_string(),
            solution: rule.solution.to_string(),
        })
        .collect();

    if solutions.is_empty() && total_entries > 0 {
        // Ties go to the name that sorts first.
        let busiest = components
            .iter()
            .fold(None, |best: Option<(&String, usize)>, (name, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((name, count)),
            })
            .map_or("unknown", |(name, _)| name.as_str());
        solutions.push(Solution {
            problem: format!("Multiple errors in {} component", busiest),
            solution: format!(
                "Review the {} component logs in detail and check recent code changes or configuration updates to this component.",
                busiest
            ),
        });
    }

    solutions
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid analysis pattern: {}", pattern))
}
