//! Reassembly of a JSON response from fragmented transport reads.
//!
//! # Design
//! The modem hands over a response in arbitrary pieces, sometimes preceded by
//! protocol noise (status line, headers, framing leftovers). The assembler only
//! cares about the first JSON object: everything before the first `{` is
//! ignored, everything after the object closes is ignored too. A buffer with no
//! `{` yet is always `Incomplete`, never `Malformed`.

use std::borrow::Cow;

use serde_json::Value;

/// Outcome of one extraction attempt over the accumulated buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Extract {
    /// More data is needed before a JSON object can be read.
    Incomplete,
    /// A full JSON object was found.
    Complete(Value),
    /// The data after the first `{` cannot be valid JSON no matter what follows.
    Malformed(String),
}

/// Try to read the first JSON object out of `buffer`.
pub fn extract(buffer: &[u8]) -> Extract {
    let Some(start) = buffer.iter().position(|b| *b == b'{') else {
        return Extract::Incomplete;
    };

    let mut values = serde_json::Deserializer::from_slice(&buffer[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => Extract::Complete(value),
        Some(Err(err)) if err.is_eof() => Extract::Incomplete,
        Some(Err(err)) => Extract::Malformed(err.to_string()),
        None => Extract::Incomplete,
    }
}

/// Accumulates the reads of a single send attempt.
#[derive(Debug, Default, Clone)]
pub struct ResponseAssembler {
    buffer: Vec<u8>,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    pub fn try_extract(&self) -> Extract {
        extract(&self.buffer)
    }

    /// Status code of an `HTTP/1.x NNN` line received ahead of the JSON, if any.
    pub fn status(&self) -> Option<u16> {
        let head = match self.buffer.iter().position(|b| *b == b'{') {
            Some(start) => &self.buffer[..start],
            None => &self.buffer[..],
        };
        let head = String::from_utf8_lossy(head);
        let line = &head[head.find("HTTP/1.")?..];
        line.split_whitespace().nth(1)?.parse().ok()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fragments_complete_on_third_read() {
        let mut asm = ResponseAssembler::new();

        asm.push(b"prefix-noise");
        assert_eq!(asm.try_extract(), Extract::Incomplete);

        asm.push(b"{\"ok\":tr");
        assert_eq!(asm.try_extract(), Extract::Incomplete);

        asm.push(b"ue}");
        assert_eq!(asm.try_extract(), Extract::Complete(json!({"ok": true})));
    }

    #[test]
    fn complete_extraction_is_idempotent() {
        let mut asm = ResponseAssembler::new();
        asm.push(b"HTTP/1.1 200 OK\r\n\r\n{\"a\": [1, 2]}\r\n");
        let first = asm.try_extract();
        let second = asm.try_extract();
        assert_eq!(first, second);
        assert_eq!(first, Extract::Complete(json!({"a": [1, 2]})));
    }

    #[test]
    fn buffers_without_brace_are_incomplete() {
        let cases: [&[u8]; 4] = [b"", b"HTTP/1.1 200 OK\r\n", b"]]]::garbage", b"\x00\xff\xfe"];
        for noise in cases {
            assert_eq!(extract(noise), Extract::Incomplete);
        }
    }

    #[test]
    fn invalid_token_is_malformed() {
        assert!(matches!(extract(b"{\"ok\": nope}"), Extract::Malformed(_)));
        assert!(matches!(extract(b"{\"a\": 1]"), Extract::Malformed(_)));
    }

    #[test]
    fn truncated_number_and_string_are_incomplete() {
        assert_eq!(extract(b"{\"a\": 12"), Extract::Incomplete);
        assert_eq!(extract(b"{\"a\": \"hal"), Extract::Incomplete);
        assert_eq!(extract(b"{"), Extract::Incomplete);
    }

    #[test]
    fn trailing_data_after_object_is_ignored() {
        assert_eq!(
            extract(b"{\"a\":1}\r\n0\r\n\r\n"),
            Extract::Complete(json!({"a": 1}))
        );
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let text = "{\"name\":\"caf\u{e9}\"}".as_bytes();
        let split = text.len() - 3;
        let mut asm = ResponseAssembler::new();
        asm.push(&text[..split]);
        assert_eq!(asm.try_extract(), Extract::Incomplete);
        asm.push(&text[split..]);
        assert_eq!(asm.try_extract(), Extract::Complete(json!({"name": "caf\u{e9}"})));
    }

    #[test]
    fn status_line_is_read_when_present() {
        let mut asm = ResponseAssembler::new();
        asm.push(b"HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\n\r\n{\"error\":{}}");
        assert_eq!(asm.status(), Some(401));

        let mut bare = ResponseAssembler::new();
        bare.push(b"{\"a\":1}");
        assert_eq!(bare.status(), None);
    }

    #[test]
    fn clear_resets_the_buffer() {
        let mut asm = ResponseAssembler::new();
        asm.push(b"{\"a\"");
        assert!(!asm.is_empty());
        asm.clear();
        assert!(asm.is_empty());
        assert_eq!(asm.text(), "");
    }
}
