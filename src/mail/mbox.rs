use rayon::prelude::*;
use std::path::{Path, PathBuf};

use super::types::RawMessage;
use crate::error::{Result, StatsError};

/// Anything that can hand over the raw records of a mailbox
pub trait MailSource {
    fn messages(&self) -> Result<Vec<RawMessage>>;
}

/// Already-loaded records, used for tests and API-fed runs
impl MailSource for Vec<RawMessage> {
    fn messages(&self) -> Result<Vec<RawMessage>> {
        Ok(self.clone())
    }
}

/// One `.mbox` file or a directory tree of them (Takeout exports nest them)
#[derive(Debug, Clone)]
pub struct MboxSource {
    files: Vec<PathBuf>,
}

impl MboxSource {
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_mbox(e.path()))
                .map(|e| e.into_path())
                .collect();
            files.sort();
            if files.is_empty() {
                return Err(StatsError::NotMbox(path.display().to_string()));
            }
            return Ok(Self { files });
        }

        if !is_mbox(path) {
            return Err(StatsError::NotMbox(path.display().to_string()));
        }
        Ok(Self {
            files: vec![path.to_path_buf()],
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl MailSource for MboxSource {
    fn messages(&self) -> Result<Vec<RawMessage>> {
        let mut all = Vec::new();
        for file in &self.files {
            let raw = std::fs::read(file)?;
            let segments = split_mbox(&raw);
            tracing::debug!(file = %file.display(), messages = segments.len(), "read mbox");

            // Order matters downstream, and collect() keeps it
            let parsed: Vec<RawMessage> = segments.par_iter().map(|s| parse_headers(s)).collect();
            all.extend(parsed);
        }
        Ok(all)
    }
}

pub fn is_mbox(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("mbox")
}

/// Split an mbox file on its `From ` separator lines. Each returned segment
/// starts right after the separator line.
fn split_mbox(raw: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    if raw.starts_with(b"From ") {
        starts.push(0);
    }
    let mut pos = 0;
    while let Some(off) = find(&raw[pos..], b"\nFrom ") {
        starts.push(pos + off + 1);
        pos += off + 1;
    }

    let mut segments = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(raw.len());
        let chunk = &raw[start..end];
        // Drop the separator line itself
        let body = match find(chunk, b"\n") {
            Some(nl) => &chunk[nl + 1..],
            None => &[][..],
        };
        segments.push(body);
    }
    segments
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Unfold the header block of one message into a `RawMessage`.
/// The first occurrence of a repeated header wins.
fn parse_headers(segment: &[u8]) -> RawMessage {
    let header_end = find(segment, b"\n\n")
        .or_else(|| find(segment, b"\r\n\r\n"))
        .unwrap_or(segment.len());
    let block = String::from_utf8_lossy(&segment[..header_end]);

    let mut raw = RawMessage::new();
    let mut current: Option<(String, String)> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            save_header(&mut raw, name, value);
        }
        if let Some(colon) = line.find(':') {
            current = Some((line[..colon].to_lowercase(), line[colon + 1..].trim().to_string()));
        }
    }
    if let Some((name, value)) = current.take() {
        save_header(&mut raw, name, value);
    }

    // RFC 2047 encoded-words are common in member subjects
    if raw.get("subject").is_some_and(|s| s.contains("=?")) {
        let decoded = mail_parser::MessageParser::default()
            .parse(&segment[..(header_end + 2).min(segment.len())])
            .and_then(|m| m.subject().map(|s| s.to_string()));
        if let Some(subject) = decoded {
            raw.headers.insert("subject".to_string(), subject);
        }
    }
    raw
}

fn save_header(raw: &mut RawMessage, name: String, value: String) {
    raw.headers.entry(name).or_insert(value);
}
