//! Format detection and canonicalization of raw log lines.
//!
//! Detection tries the Apache error-log header first, then the syslog
//! header (BSD and RFC 3339 flavours). The canonical text drops the
//! timestamp, host and process-id noise so that two occurrences of the same
//! event compare equal. Terminal escape sequences are removed and whitespace
//! runs collapse to a single space; everything else is left intact.

use anyhow::{Context, Result};
use std::borrow::Cow;
use chrono::{DateTime, NaiveDateTime};
use fancy_regex::Regex;

use crate::log_entry::{FormatMode, SourceFormat};

const APACHE_HEADER: &str =
    r"^\[(?P<ts>[A-Z][a-z]{2} [A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}(?:\.\d+)? \d{4})\]";
const APACHE_NOISE: &str = r"\[(?:pid \d+(?::tid \d+)?|client [^\]]+)\]";
const SYSLOG_BSD_HEADER: &str =
    r"^(?P<ts>[A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2})\s+(?P<host>\S+)\s*(?P<rest>.*)$";
const SYSLOG_RFC3339_HEADER: &str = r"^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(?P<host>\S+)\s*(?P<rest>.*)$";
const PROCESS_PID: &str = r"^(?P<proc>[^\s\[\]]+)\[\d+\]";
const ISO_TIMESTAMP: &str = r"(?P<date>\d{4}-\d{2}-\d{2})[T ](?P<time>\d{2}:\d{2}:\d{2})";

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub source_format: SourceFormat,
    pub canonical_text: String,
    pub timestamp: Option<NaiveDateTime>,
}

pub struct Normalizer {
    apache_header: Regex,
    apache_noise: Regex,
    syslog_bsd: Regex,
    syslog_rfc3339: Regex,
    process_pid: Regex,
    iso_timestamp: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            apache_header: compile(APACHE_HEADER)?,
            apache_noise: compile(APACHE_NOISE)?,
            syslog_bsd: compile(SYSLOG_BSD_HEADER)?,
            syslog_rfc3339: compile(SYSLOG_RFC3339_HEADER)?,
            process_pid: compile(PROCESS_PID)?,
            iso_timestamp: compile(ISO_TIMESTAMP)?,
        })
    }

    pub fn normalize(&self, line: &str, mode: FormatMode) -> Normalized {
        let stripped = strip_ansi_codes(line);
        let line = stripped.as_ref();
        let detected = match mode {
            FormatMode::Auto => self.apache(line).or_else(|| self.linux(line)),
            FormatMode::Apache => self.apache(line),
            FormatMode::Linux => self.linux(line),
        };

        match detected {
            Some(mut normalized) => {
                if normalized.canonical_text.is_empty() {
                    normalized.canonical_text = collapse_whitespace(line);
                }
                normalized
            }
            None => Normalized {
                source_format: mode.forced_format().unwrap_or(SourceFormat::Unknown),
                canonical_text: collapse_whitespace(line),
                timestamp: self.embedded_timestamp(line),
            },
        }
    }

    pub fn detect(&self, line: &str) -> SourceFormat {
        self.normalize(line, FormatMode::Auto).source_format
    }

    fn apache(&self, line: &str) -> Option<Normalized> {
        let caps = self.apache_header.captures(line).ok()??;
        let header = caps.get(0)?;
        let ts = caps.name("ts")?.as_str();

        let body = &line[header.end()..];
        let body = self.apache_noise.replace_all(body, " ");

        Some(Normalized {
            source_format: SourceFormat::Apache,
            canonical_text: collapse_whitespace(&body),
            timestamp: parse_apache_timestamp(ts),
        })
    }

    fn linux(&self, line: &str) -> Option<Normalized> {
        let (caps, timestamp) = match self.syslog_bsd.captures(line).ok().flatten() {
            // BSD syslog carries no year, so it cannot be placed on a timeline.
            Some(caps) => (caps, None),
            None => {
                let caps = self.syslog_rfc3339.captures(line).ok()??;
                let ts = parse_rfc3339_timestamp(caps.name("ts")?.as_str());
                (caps, ts)
            }
        };

        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
        let rest = match self.process_pid.captures(rest).ok().flatten() {
            Some(tag) => {
                let whole = tag.get(0).map(|m| m.end()).unwrap_or(0);
                let process = tag.name("proc").map(|m| m.as_str()).unwrap_or_default();
                format!("{}{}", process, &rest[whole..])
            }
            None => rest.to_string(),
        };

        Some(Normalized {
            source_format: SourceFormat::Linux,
            canonical_text: collapse_whitespace(&rest),
            timestamp,
        })
    }

    fn embedded_timestamp(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.iso_timestamp.captures(line).ok()??;
        let date = caps.name("date")?.as_str();
        let time = caps.name("time")?.as_str();
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S").ok()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid log pattern: {}", pattern))
}

/// Removes terminal escape sequences (CSI colours, OSC titles and two-byte
/// escapes) from a line. Lines without an ESC byte are returned as-is.
pub fn strip_ansi_codes(line: &str) -> Cow<'_, str> {
    if !line.contains('\x1b') {
        return Cow::Borrowed(line);
    }

    let mut output = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            output.push(c);
            continue;
        }
        match chars.peek().copied() {
            // CSI: parameters and intermediates up to a final byte in @..~
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: terminated by BEL or ST (ESC \)
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(next) if ('\x40'..='\x7e').contains(&next) => {
                chars.next();
            }
            _ => {}
        }
    }
    Cow::Owned(output)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_apache_timestamp(ts: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&collapse_whitespace(ts), "%a %b %d %H:%M:%S%.f %Y").ok()
}

fn parse_rfc3339_timestamp(ts: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const APACHE_LINE: &str =
        "[Thu Jun 09 06:07:05 2005] [error] env.createBean2(): Factory error creating channel.jni:jni";
    const LINUX_LINE: &str = "Jun  9 06:06:20 combo syslogd 1.4.1: restart";

    fn normalizer() -> Normalizer {
        Normalizer::new().expect("patterns should compile")
    }

    #[test]
    fn detects_apache_and_linux_lines() {
        let n = normalizer();
        assert_eq!(n.detect(APACHE_LINE), SourceFormat::Apache);
        assert_eq!(n.detect(LINUX_LINE), SourceFormat::Linux);
        assert_eq!(n.detect("plain message without header"), SourceFormat::Unknown);
    }

    #[test]
    fn apache_header_is_stripped_and_content_kept() {
        let normalized = normalizer().normalize(APACHE_LINE, FormatMode::Auto);
        assert_eq!(
            normalized.canonical_text,
            "[error] env.createBean2(): Factory error creating channel.jni:jni"
        );
        let expected = NaiveDate::from_ymd_opt(2005, 6, 9)
            .and_then(|d| d.and_hms_opt(6, 7, 5))
            .unwrap();
        assert_eq!(normalized.timestamp, Some(expected));
    }

    #[test]
    fn apache_pid_and_client_tokens_are_removed() {
        let line = "[Wed Oct 11 14:32:52.123456 2023] [core:error] [pid 4242:tid 139] [client 10.0.0.7:51234] File does not exist: /var/www/favicon.ico";
        let normalized = normalizer().normalize(line, FormatMode::Auto);
        assert_eq!(normalized.source_format, SourceFormat::Apache);
        assert_eq!(
            normalized.canonical_text,
            "[core:error] File does not exist: /var/www/favicon.ico"
        );
        assert!(normalized.timestamp.is_some());
    }

    #[test]
    fn syslog_host_and_timestamp_are_stripped() {
        let normalized = normalizer().normalize(LINUX_LINE, FormatMode::Auto);
        assert_eq!(normalized.source_format, SourceFormat::Linux);
        assert_eq!(normalized.canonical_text, "syslogd 1.4.1: restart");
        assert_eq!(normalized.timestamp, None);
    }

    #[test]
    fn syslog_pid_is_removed_but_process_kept() {
        let line = "Jun 14 15:16:01 combo sshd(pam_unix)[19939]: authentication failure; logname= uid=0";
        let a = normalizer().normalize(line, FormatMode::Auto);
        let b = normalizer().normalize(
            "Jun 15 02:04:59 combo sshd(pam_unix)[20882]: authentication failure; logname= uid=0",
            FormatMode::Auto,
        );
        assert_eq!(
            a.canonical_text,
            "sshd(pam_unix): authentication failure; logname= uid=0"
        );
        assert_eq!(a.canonical_text, b.canonical_text);
    }

    #[test]
    fn rfc3339_syslog_lines_carry_a_timestamp() {
        let line = "2024-03-01T10:15:30+00:00 web-01 nginx[812]: upstream timed out";
        let normalized = normalizer().normalize(line, FormatMode::Auto);
        assert_eq!(normalized.source_format, SourceFormat::Linux);
        assert_eq!(normalized.canonical_text, "nginx: upstream timed out");
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(10, 15, 30))
            .unwrap();
        assert_eq!(normalized.timestamp, Some(expected));
    }

    #[test]
    fn content_case_and_punctuation_survive() {
        let line = "Jun  9 06:06:20 combo kernel:   Out of MEMORY!!   Kill process 42 (java)";
        let normalized = normalizer().normalize(line, FormatMode::Auto);
        assert_eq!(
            normalized.canonical_text,
            "kernel: Out of MEMORY!! Kill process 42 (java)"
        );
    }

    #[test]
    fn forced_mode_labels_unmatched_lines() {
        let n = normalizer();
        let forced = n.normalize("something   odd happened", FormatMode::Apache);
        assert_eq!(forced.source_format, SourceFormat::Apache);
        assert_eq!(forced.canonical_text, "something odd happened");

        // Forced linux mode does not try the apache header.
        let forced = n.normalize(APACHE_LINE, FormatMode::Linux);
        assert_eq!(forced.source_format, SourceFormat::Linux);
        assert!(forced.canonical_text.starts_with("[Thu Jun 09"));
    }

    #[test]
    fn unknown_lines_pick_up_iso_timestamps() {
        let normalized = normalizer().normalize(
            "app 2023-11-02 08:00:01 ERROR payment gateway timeout",
            FormatMode::Auto,
        );
        assert_eq!(normalized.source_format, SourceFormat::Unknown);
        assert!(normalized.timestamp.is_some());
    }

    #[test]
    fn header_only_line_keeps_raw_text() {
        let normalized = normalizer().normalize("[Thu Jun 09 06:07:05 2005]", FormatMode::Auto);
        assert_eq!(normalized.source_format, SourceFormat::Apache);
        assert_eq!(normalized.canonical_text, "[Thu Jun 09 06:07:05 2005]");
    }

    #[test]
    fn ansi_sequences_are_stripped() {
        assert_eq!(strip_ansi_codes("\x1b[1;31mfailed\x1b[0m to bind"), "failed to bind");
        assert_eq!(strip_ansi_codes("\x1b]0;build\x07done"), "done");
        assert_eq!(strip_ansi_codes("\x1b]0;build\x1b\\done"), "done");
        assert_eq!(strip_ansi_codes("reset\x1bc here"), "reset here");
        assert_eq!(strip_ansi_codes("trailing\x1b"), "trailing");
        assert!(matches!(strip_ansi_codes("no escapes"), Cow::Borrowed("no escapes")));
    }

    #[test]
    fn coloured_lines_normalize_like_plain_ones() {
        let normalizer = normalizer();
        let coloured = normalizer.normalize(
            "\x1b[32mJun  9 06:06:20\x1b[0m combo syslogd 1.4.1: restart",
            FormatMode::Auto,
        );
        let plain = normalizer.normalize(LINUX_LINE, FormatMode::Auto);
        assert_eq!(coloured, plain);

        let unknown = normalizer.normalize("\x1b[31mERROR\x1b[0m disk\x0cquota exceeded", FormatMode::Auto);
        assert_eq!(unknown.canonical_text, "ERROR disk quota exceeded");
    }
}
