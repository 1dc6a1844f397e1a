use serde_json::Value;

/// Where the parser stopped after the last feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Looking for the next complete line in the buffer
    AwaitingLine,
    /// The buffer holds no complete, parseable line; waiting for more bytes
    AwaitingMoreBytes,
}

/// Incremental reassembly of OpenAI-style SSE chat deltas.
///
/// Bytes are buffered and only split at `\n`, so multi-byte characters that
/// straddle read boundaries survive intact; decoding happens per complete
/// line. A `data:` line that fails to parse as JSON is pushed back onto the
/// front of the buffer with its newline restored and the parser waits for
/// more bytes.
///
/// `data: [DONE]` ends processing of the current feed only; bytes delivered
/// by later feeds are still parsed. That mirrors the behavior of the client
/// this replaces, where the sentinel breaks the inner line loop but the
/// outer read loop keeps going.
pub struct SseParser {
    buf: Vec<u8>,
    state: ParserState,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: ParserState::AwaitingLine,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed the next chunk of bytes; returns the content deltas completed by
    /// this chunk, in arrival order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        self.state = ParserState::AwaitingLine;

        let mut deltas = Vec::new();
        loop {
            let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
                self.state = ParserState::AwaitingMoreBytes;
                break;
            };

            // Take the line including its newline so it can be restored as-is.
            let line_bytes: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line_bytes[..newline]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            let payload = payload.trim();

            if payload == "[DONE]" {
                break;
            }

            match serde_json::from_str::<Value>(payload) {
                Ok(value) => {
                    if let Some(content) = value["choices"][0]["delta"]["content"].as_str() {
                        deltas.push(content.to_string());
                    }
                }
                Err(_) => {
                    // Line landed here before it was fully buffered: push it
                    // back and retry once more bytes arrive.
                    let mut restored = line_bytes;
                    restored.extend_from_slice(&self.buf);
                    self.buf = restored;
                    self.state = ParserState::AwaitingMoreBytes;
                    break;
                }
            }
        }

        deltas
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices":[{"delta":{"content":content}}]})
        )
    }

    fn sample_stream() -> Vec<u8> {
        let mut stream = String::new();
        stream.push_str(&delta_line("Hel"));
        stream.push('\n');
        stream.push_str(": keep-alive\n");
        stream.push_str(&delta_line("lo wor"));
        stream.push_str("event: message\n");
        stream.push_str(&delta_line("ld! 🐶"));
        stream.push_str("data: [DONE]\n");
        stream.into_bytes()
    }

    fn reassemble(stream: &[u8], chunk_size: usize) -> String {
        let mut parser = SseParser::new();
        let mut out = String::new();
        for chunk in stream.chunks(chunk_size) {
            for delta in parser.feed(chunk) {
                out.push_str(&delta);
            }
        }
        out
    }

    #[test]
    fn reassembly_is_identical_across_arbitrary_byte_splits() {
        let stream = sample_stream();
        let whole = reassemble(&stream, stream.len());
        assert_eq!(whole, "Hello world! 🐶");

        // Byte-at-a-time splits multi-byte characters mid-sequence; the
        // result must not change.
        for chunk_size in [1, 2, 3, 5, 7, 11, 64] {
            assert_eq!(reassemble(&stream, chunk_size), whole, "chunk={chunk_size}");
        }
    }

    #[test]
    fn crlf_lines_and_comments_are_handled() {
        let mut parser = SseParser::new();
        let stream = format!(
            "data: {}\r\n: ping\r\n\r\n",
            serde_json::json!({"choices":[{"delta":{"content":"hi"}}]})
        );
        assert_eq!(parser.feed(stream.as_bytes()), vec!["hi"]);
    }

    #[test]
    fn chunks_without_content_yield_nothing() {
        let mut parser = SseParser::new();
        let stream = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n";
        assert!(parser.feed(stream.as_bytes()).is_empty());
        assert_eq!(parser.state(), ParserState::AwaitingMoreBytes);
    }

    #[test]
    fn incomplete_line_waits_for_more_bytes() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"choices\":[{\"del").is_empty());
        assert_eq!(parser.state(), ParserState::AwaitingMoreBytes);

        let rest = "ta\":{\"content\":\"split\"}}]}\n";
        assert_eq!(parser.feed(rest.as_bytes()), vec!["split"]);
    }

    #[test]
    fn unparseable_data_line_is_pushed_back_and_parked() {
        let mut parser = SseParser::new();
        let broken = b"data: {\"broken\n";
        assert!(parser.feed(broken).is_empty());
        assert_eq!(parser.state(), ParserState::AwaitingMoreBytes);

        // The line is parked at the front of the buffer; everything behind it
        // stays unprocessed until the line completes (which it never does).
        assert!(parser.feed(delta_line("later").as_bytes()).is_empty());
        assert_eq!(parser.state(), ParserState::AwaitingMoreBytes);
    }

    #[test]
    fn done_ends_the_current_feed_but_not_later_ones() {
        let mut parser = SseParser::new();
        let mut stream = String::from("data: [DONE]\n");
        stream.push_str(&delta_line("after"));

        // The sentinel stops this feed before "after" is reached...
        assert!(parser.feed(stream.as_bytes()).is_empty());

        // ...but the next read processes what was left in the buffer.
        assert_eq!(parser.feed(b""), vec!["after"]);
    }
}
