//! Newline framing for DCC chat sockets.

use tracing::warn;

/// Longest line a peer may send, separator excluded.
pub const MAX_LINE: usize = 8 * 1024;

/// Accumulates raw bytes from one peer and yields complete lines.
///
/// Lines end in `\n` with an optional preceding `\r`. The trailing fragment
/// after the last separator stays buffered until more data arrives. Bytes are
/// kept undecoded until a line completes so that a multi-byte character split
/// across two reads survives intact.
///
/// A line longer than the limit is dropped: its buffered bytes are freed and
/// everything up to the next separator is skipped.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit: limit.max(1),
            discarding: false,
        }
    }

    /// Append `chunk` and drain every line it completes. Empty lines are skipped.
    ///
    /// Only `chunk` is scanned for separators, never the buffered fragment.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<String> {
        if self.discarding {
            let Some(end) = chunk.iter().position(|&b| b == b'\n') else {
                return Vec::new();
            };
            self.discarding = false;
            chunk = &chunk[end + 1..];
        }

        let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.pending.extend_from_slice(chunk);
            self.enforce_limit();
            return Vec::new();
        };
        self.pending.extend_from_slice(&chunk[..=last_newline]);
        let complete = std::mem::replace(&mut self.pending, chunk[last_newline + 1..].to_vec());
        self.enforce_limit();

        let limit = self.limit;
        complete
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .filter(|line| {
                if line.len() > limit {
                    warn!(len = line.len(), limit, "oversized DCC line dropped");
                    return false;
                }
                true
            })
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// The partial line waiting for its separator.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    fn enforce_limit(&mut self) {
        if self.pending.len() > self.limit {
            warn!(len = self.pending.len(), limit = self.limit, "oversized DCC line dropped");
            self.pending = Vec::new();
            self.discarding = true;
        }
    }
}
