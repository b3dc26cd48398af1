//! Incremental newline-delimited JSON framing.
//!
//! Network chunks do not respect line boundaries, so [`NdjsonDecoder`]
//! buffers bytes and hands out only complete lines.  Splitting on the raw
//! `\n` byte is safe for UTF-8 because no multi-byte sequence contains it.

/// Buffers raw bytes and yields complete, non-blank lines.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(text) = decode_line(&line) {
                lines.push(text);
            }
        }
        lines
    }

    /// Return whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_lines_in_one_chunk() {
        let mut d = NdjsonDecoder::new();
        let lines = d.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn line_split_across_chunks() {
        let mut d = NdjsonDecoder::new();
        assert!(d.push(b"{\"content\":\"hel").is_empty());
        let lines = d.push(b"lo\"}\n{\"x\"");
        assert_eq!(lines, vec!["{\"content\":\"hello\"}"]);
        assert_eq!(d.finish().as_deref(), Some("{\"x\""));
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let text = "{\"content\":\"你好\"}\n";
        let bytes = text.as_bytes();
        // Cut inside the first CJK character.
        let cut = text.find('你').expect("present") + 1;

        let mut d = NdjsonDecoder::new();
        assert!(d.push(&bytes[..cut]).is_empty());
        assert_eq!(d.push(&bytes[cut..]), vec!["{\"content\":\"你好\"}"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut d = NdjsonDecoder::new();
        assert_eq!(d.push(b"\n\r\n  \n{}\n"), vec!["{}"]);
    }
}
