use tracing::warn;

/// Largest partial line kept between reads.
pub const MAX_PENDING: usize = 8 * 1024;

/// Splits a byte stream into trimmed, non-blank protocol lines.
///
/// One framer per connection: bytes after the last line break are carried into
/// the next `feed`.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(line) = clean(&self.pending[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING {
            warn!(len = self.pending.len(), "discarding oversized partial line");
            self.pending.clear();
        }
        lines
    }

    /// Flush whatever partial line is left once the peer has closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        clean(&rest)
    }
}

fn clean(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
