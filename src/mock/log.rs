//! Access log parsing for the mock server's output.
//!
//! The mock server writes one access-log line per request in the combined
//! log layout:
//!
//! ```text
//! 172.17.0.1 - - [01/Jan/2024:00:00:00 +0000] "GET /pets HTTP/1.1" 200 512
//! ```
//!
//! Parsing is positional: the line is split on single spaces and fixed token
//! indices are picked out. The upstream format is not validated beyond having
//! enough tokens.

use crate::mock::error::MalformedLogLine;

const TIMESTAMP_TOKEN: usize = 3;
const METHOD_TOKEN: usize = 5;
const PATH_TOKEN: usize = 6;
const STATUS_TOKEN: usize = 8;

/// Minimum number of space-separated tokens an access-log line must have.
pub const MIN_TOKENS: usize = STATUS_TOKEN + 1;

/// One request served by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogEntry {
    /// Timestamp as emitted by the server, without the leading `[`.
    pub timestamp: String,
    /// HTTP method, without the leading quote.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Status code as emitted.
    pub status_code: String,
}

impl AccessLogEntry {
    /// Parse one raw log line.
    pub fn parse(line: &str) -> Result<Self, MalformedLogLine> {
        let tokens: Vec<&str> = line.split(' ').collect();

        let token = |index: usize| {
            tokens.get(index).copied().ok_or_else(|| MalformedLogLine {
                line: line.to_string(),
                tokens: tokens.len(),
                expected: MIN_TOKENS,
            })
        };

        let status_code = token(STATUS_TOKEN)?;
        let timestamp = token(TIMESTAMP_TOKEN)?;
        let method = token(METHOD_TOKEN)?;
        let path = token(PATH_TOKEN)?;

        Ok(Self {
            timestamp: timestamp
                .strip_prefix('[')
                .unwrap_or(timestamp)
                .to_string(),
            method: method.strip_prefix('"').unwrap_or(method).to_string(),
            path: path.to_string(),
            status_code: status_code.to_string(),
        })
    }

    /// Status code as a number, if it is one.
    pub fn status(&self) -> Option<u16> {
        self.status_code.parse().ok()
    }
}

/// Longest partial line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reassembles lines from arbitrarily split output chunks.
///
/// Docker delivers TTY output in chunks that do not line up with newlines or
/// with UTF-8 character boundaries, so bytes are buffered and only complete
/// lines are decoded. A partial line that grows past [`MAX_LINE_BYTES`] is
/// dropped along with the rest of that line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    chunk = &chunk[newline + 1..];
                    self.discarding = false;
                }
                None => return Vec::new(),
            }
        }
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(newline + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            lines.extend(decode(&line));
        }

        if self.pending.len() > MAX_LINE_BYTES {
            tracing::debug!(
                bytes = self.pending.len(),
                "Dropping log line longer than {} bytes",
                MAX_LINE_BYTES
            );
            self.pending.clear();
            self.discarding = true;
        }
        lines
    }

    /// Return the trailing partial line, if any.
    pub fn finish(self) -> Option<String> {
        if self.discarding {
            return None;
        }
        decode(&self.pending)
    }
}

fn decode(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim_end_matches(['\n', '\r']);
    (!line.is_empty()).then(|| line.to_string())
}
