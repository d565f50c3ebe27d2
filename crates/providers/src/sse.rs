//! Server-Sent Events line splitting shared by the streaming providers.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks decode correctly.

/// A meaningful SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseLine {
    /// `event: <name>`
    Event(String),
    /// `data: <payload>`
    Data(String),
}

#[derive(Debug, Default)]
pub(crate) struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    /// Feed raw bytes, returning every complete line they finish.
    ///
    /// Blank lines, comments (`:`) and fields other than `event`/`data` are
    /// dropped.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                lines.push(SseLine::Data(data.trim_start().to_string()));
            } else if let Some(event) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(event.trim().to_string()));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut lines = SseLines::default();
        let out = lines.push(b"event: ping\ndata: {\"a\":1}\n\n: keep-alive\n");
        assert_eq!(
            out,
            vec![
                SseLine::Event("ping".into()),
                SseLine::Data("{\"a\":1}".into())
            ]
        );
    }

    #[test]
    fn buffers_partial_lines() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"data: {\"text\":\"ha").is_empty());
        let out = lines.push(b"lf\"}\r\n");
        assert_eq!(out, vec![SseLine::Data("{\"text\":\"half\"}".into())]);
    }

    #[test]
    fn utf8_split_across_chunks() {
        let mut lines = SseLines::default();
        let text = "data: café\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = text.len() - 2;
        assert!(lines.push(&text[..split]).is_empty());
        let out = lines.push(&text[split..]);
        assert_eq!(out, vec![SseLine::Data("café".into())]);
    }
}
