use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::MAX_ENTRIES_PER_FILE;
use crate::error::Diagnostics;
use crate::log_entry::{FormatMode, LogEntry};
use crate::normalizer::{strip_ansi_codes, Normalizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
    Iso8859_1,
}

/// Tried in order until one yields text.
pub const ENCODINGS: [Encoding; 3] = [Encoding::Utf8, Encoding::Latin1, Encoding::Iso8859_1];

impl Encoding {
    /// Decodes one line. A NUL byte marks binary content, which is not text
    /// under any encoding; other control characters such as ANSI escapes or
    /// form feeds are kept and dealt with during normalization.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        if bytes.contains(&0) {
            return None;
        }
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            // Printable Latin-1 only: the C1 block means this was not Latin-1 text.
            Encoding::Latin1 => {
                if bytes.iter().any(|b| (0x80..0xa0).contains(b)) {
                    return None;
                }
                Some(bytes.iter().map(|&b| b as char).collect())
            }
            Encoding::Iso8859_1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

pub fn decode_line(bytes: &[u8]) -> Option<(String, Encoding)> {
    ENCODINGS
        .iter()
        .find_map(|encoding| encoding.decode(bytes).map(|text| (text, *encoding)))
}

/// Recursively collects `.log` files below `directory`, sorted by path.
/// Symlinks to files are followed; symlinks to directories are not.
pub fn find_log_files(directory: &Path, max_files: usize) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![directory.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let read_dir = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory '{}'", dir.display()))?;
        for entry in read_dir {
            let found = entry.and_then(|entry| Ok((entry.path(), entry.file_type()?)));
            let (path, file_type) = match found {
                Ok(found) => found,
                Err(e) => {
                    warn!("Skipping unreadable directory entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            // Symlinked directories are not descended into, so a link cycle
            // cannot revisit the same files.
            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "log") && path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files.truncate(max_files);
    Ok(files)
}

pub struct Ingestor<'a> {
    normalizer: &'a Normalizer,
    mode: FormatMode,
    max_entries_per_file: usize,
}

impl<'a> Ingestor<'a> {
    pub fn new(normalizer: &'a Normalizer, mode: FormatMode) -> Self {
        Self {
            normalizer,
            mode,
            max_entries_per_file: MAX_ENTRIES_PER_FILE,
        }
    }

    pub fn ingest_files(&self, files: &[PathBuf], diagnostics: &mut Diagnostics) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        for path in files {
            match self.ingest_file(path, diagnostics) {
                Ok(mut file_entries) => {
                    debug!("Read {} entries from {}", file_entries.len(), path.display());
                    entries.append(&mut file_entries);
                }
                Err(e) => {
                    warn!("Skipping {}: {:#}", path.display(), e);
                    diagnostics.unreadable_files += 1;
                }
            }
        }
        info!("Ingested {} entries from {} files", entries.len(), files.len());
        entries
    }

    pub fn ingest_file(&self, path: &Path, diagnostics: &mut Diagnostics) -> Result<Vec<LogEntry>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("Failed to stat log file '{}'", path.display()))?
            .len();
        if len == 0 {
            return Ok(Vec::new());
        }

        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map log file '{}'", path.display()))?;
        Ok(self.ingest_bytes(path, &mmap, diagnostics))
    }

    /// Splits `bytes` into lines and keeps the first `MAX_ENTRIES_PER_FILE`
    /// decodable, non-blank ones.
    pub fn ingest_bytes(&self, path: &Path, bytes: &[u8], diagnostics: &mut Diagnostics) -> Vec<LogEntry> {
        let mut entries = Vec::new();

        for (line_no, line) in bytes.split(|&b| b == b'\n').enumerate() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            if entries.len() >= self.max_entries_per_file {
                diagnostics.dropped_by_cap += 1;
                continue;
            }

            let Some((raw_text, encoding)) = decode_line(line) else {
                diagnostics.decode_failures += 1;
                warn!(
                    "Could not decode line {} of {} with any encoding",
                    line_no + 1,
                    path.display()
                );
                continue;
            };
            // A line holding only colour resets carries no text.
            if strip_ansi_codes(&raw_text).trim().is_empty() {
                continue;
            }
            if encoding != Encoding::Utf8 {
                debug!("Decoded a line of {} as {:?}", path.display(), encoding);
            }

            let normalized = self.normalizer.normalize(&raw_text, self.mode);
            entries.push(LogEntry {
                raw_text,
                canonical_text: normalized.canonical_text,
                source_format: normalized.source_format,
                source_file: path.to_path_buf(),
                ingestion_index: entries.len(),
                timestamp: normalized.timestamp,
                low_confidence: false,
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::SourceFormat;
    use tempfile::TempDir;

    fn normalizer() -> Normalizer {
        Normalizer::new().expect("patterns should compile")
    }

    #[test]
    fn decode_falls_back_to_latin1() {
        let (text, encoding) = decode_line(b"caf\xe9 closed").unwrap();
        assert_eq!(text, "café closed");
        assert_eq!(encoding, Encoding::Latin1);
    }

    #[test]
    fn decode_uses_iso_8859_1_for_c1_bytes() {
        let (_, encoding) = decode_line(b"weird \x85 byte").unwrap();
        assert_eq!(encoding, Encoding::Iso8859_1);
    }

    #[test]
    fn decode_rejects_binary_lines() {
        assert!(decode_line(b"\x00\x01\x02ELF").is_none());
        assert!(decode_line(b"tab\tseparated").is_some());
    }

    #[test]
    fn decode_keeps_utf8_with_terminal_controls() {
        let (text, encoding) = decode_line(b"\x1b[31mERROR\x1b[0m disk quota exceeded").unwrap();
        assert_eq!(encoding, Encoding::Utf8);
        assert!(text.starts_with('\x1b'));

        let (_, encoding) = decode_line(b"page break\x0cnext page").unwrap();
        assert_eq!(encoding, Encoding::Utf8);
    }

    #[test]
    fn coloured_lines_are_ingested_without_escapes() {
        let normalizer = normalizer();
        let ingestor = Ingestor::new(&normalizer, FormatMode::Auto);
        let bytes = b"\x1b[31mERROR\x1b[0m disk quota exceeded\n\x1b[0m\n\x1b[1;33mWARN\x1b[0m retrying upload\nplain line\n";
        let mut diagnostics = Diagnostics::default();

        let entries = ingestor.ingest_bytes(Path::new("colour.log"), bytes, &mut diagnostics);

        assert_eq!(entries.len(), 3);
        assert_eq!(diagnostics.decode_failures, 0);
        assert_eq!(entries[0].raw_text, "\x1b[31mERROR\x1b[0m disk quota exceeded");
        assert_eq!(entries[0].canonical_text, "ERROR disk quota exceeded");
        assert_eq!(entries[1].canonical_text, "WARN retrying upload");
    }

    #[test]
    fn cap_keeps_first_entries_in_file_order() {
        let normalizer = normalizer();
        let ingestor = Ingestor::new(&normalizer, FormatMode::Auto);
        let content: String = (0..1500).map(|i| format!("event number {}\n", i)).collect();
        let mut diagnostics = Diagnostics::default();

        let entries = ingestor.ingest_bytes(Path::new("big.log"), content.as_bytes(), &mut diagnostics);

        assert_eq!(entries.len(), 1000);
        assert_eq!(entries[0].raw_text, "event number 0");
        assert_eq!(entries[999].raw_text, "event number 999");
        assert_eq!(entries[999].ingestion_index, 999);
        assert_eq!(diagnostics.dropped_by_cap, 500);
    }

    #[test]
    fn blank_and_undecodable_lines_are_skipped() {
        let normalizer = normalizer();
        let ingestor = Ingestor::new(&normalizer, FormatMode::Auto);
        let bytes = b"first line\r\n\n   \n\x00\x00binary\nsecond line\n";
        let mut diagnostics = Diagnostics::default();

        let entries = ingestor.ingest_bytes(Path::new("mixed.log"), bytes, &mut diagnostics);

        let raw: Vec<&str> = entries.iter().map(|e| e.raw_text.as_str()).collect();
        assert_eq!(raw, vec!["first line", "second line"]);
        assert_eq!(entries[1].ingestion_index, 1);
        assert_eq!(diagnostics.decode_failures, 1);
    }

    #[test]
    fn entries_keep_raw_text_and_format() {
        let normalizer = normalizer();
        let ingestor = Ingestor::new(&normalizer, FormatMode::Auto);
        let mut diagnostics = Diagnostics::default();
        let bytes = b"Jun  9 06:06:20 combo syslogd 1.4.1: restart\n";

        let entries = ingestor.ingest_bytes(Path::new("linux.log"), bytes, &mut diagnostics);

        assert_eq!(entries[0].raw_text, "Jun  9 06:06:20 combo syslogd 1.4.1: restart");
        assert_eq!(entries[0].canonical_text, "syslogd 1.4.1: restart");
        assert_eq!(entries[0].source_format, SourceFormat::Linux);
        assert_eq!(entries[0].source_file, PathBuf::from("linux.log"));
    }

    #[test]
    fn find_log_files_recurses_and_sorts() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let nested = temp_dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("b.log"), "b").unwrap();
        fs::write(temp_dir.path().join("a.log"), "a").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(nested.join("c.log"), "c").unwrap();

        let files = find_log_files(temp_dir.path(), 100).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(temp_dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.log", "b.log", "nested/c.log"]);

        assert_eq!(find_log_files(temp_dir.path(), 2).unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn find_log_files_does_not_follow_directory_links() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        fs::write(temp_dir.path().join("app.log"), "a").unwrap();
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("app.log"), temp_dir.path().join("alias.log")).unwrap();

        let files = find_log_files(temp_dir.path(), 100).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(temp_dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["alias.log", "app.log"]);
    }

    #[test]
    fn missing_file_is_counted_not_fatal() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let good = temp_dir.path().join("good.log");
        fs::write(&good, "hello world\n").unwrap();
        let empty = temp_dir.path().join("empty.log");
        fs::write(&empty, "").unwrap();

        let normalizer = normalizer();
        let ingestor = Ingestor::new(&normalizer, FormatMode::Auto);
        let mut diagnostics = Diagnostics::default();
        let files = vec![temp_dir.path().join("gone.log"), empty, good];

        let entries = ingestor.ingest_files(&files, &mut diagnostics);

        assert_eq!(entries.len(), 1);
        assert_eq!(diagnostics.unreadable_files, 1);
    }
}
