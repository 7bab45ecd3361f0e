//! Line framing for protocol modules.
//!
//! Transports deliver bytes exactly as read. IRC-style protocols frame on
//! `\n` with an optional preceding `\r`; [`LineBuffer`] does that framing and
//! keeps incomplete tails between reads.

/// Default maximum line length, in bytes, excluding the terminator.
pub const DEFAULT_MAX_LINE: usize = 8192;

/// Accumulates received bytes and yields complete lines.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line: usize,
    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl LineBuffer {
    /// Create a buffer accepting lines up to [`DEFAULT_MAX_LINE`] bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Create a buffer accepting lines up to `max_line` bytes.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Feed received bytes; returns every line completed by them.
    ///
    /// Terminators are stripped, empty lines are skipped, invalid UTF-8 is
    /// replaced, and lines longer than the limit are dropped entirely.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_line {
                tracing::debug!(len = line.len(), "dropping overlong line");
                continue;
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }

        if self.buf.len() > self.max_line {
            tracing::debug!(len = self.buf.len(), "discarding overlong partial line");
            self.buf.clear();
            self.discarding = true;
        }
        lines
    }

    /// Bytes held for an incomplete line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode one outbound line with a CRLF terminator.
///
/// Embedded CR/LF characters are cut so a single call can never emit more
/// than one protocol line.
#[must_use]
pub fn encode_line(line: &str) -> Vec<u8> {
    let body = line.split(['\r', '\n']).next().unwrap_or("");
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}
