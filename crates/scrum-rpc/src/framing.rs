//! Newline framing over an arbitrarily chunked byte stream.

/// Upper bound on a single unterminated line. Anything longer is dropped
/// rather than buffered without limit.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Rolling buffer that turns byte chunks into complete lines.
///
/// Bytes after the last `\n` are kept until a later chunk completes them, so
/// the lines produced do not depend on where the chunk boundaries fall.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, without the
    /// terminator. Blank lines and lines that are not valid UTF-8 are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            if self.overflowed {
                self.overflowed = false;
                self.buf.clear();
                continue;
            }
            self.buf.extend_from_slice(head);
            let raw = std::mem::take(&mut self.buf);
            match String::from_utf8(raw) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                }
                Err(e) => {
                    tracing::warn!(bytes = e.as_bytes().len(), "dropping line that is not valid UTF-8");
                }
            }
        }
        if !self.overflowed {
            self.buf.extend_from_slice(rest);
            if self.buf.len() > MAX_LINE_BYTES {
                tracing::warn!(bytes = self.buf.len(), "dropping oversized line");
                self.buf.clear();
                self.overflowed = true;
            }
        }
        lines
    }

    /// Bytes held for an incomplete trailing line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
