use super::StreamEvent;
use serde_json::Value;

/// Reassembles lines from arbitrarily split body chunks.
///
/// Splitting happens on raw bytes, so a multi-byte character divided between two
/// chunks is decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The trailing line of a body that did not end with a newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest)
            .trim_end_matches('\r')
            .to_string();
        Some(line)
    }
}

fn extract_content(payload: &Value) -> Option<&str> {
    payload
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
        })
        .or_else(|| payload.get("content").and_then(Value::as_str))
}

/// Interpret one SSE line. Comments, other fields and blank deltas yield `None`.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(StreamEvent::Completed);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => extract_content(&value)
            .filter(|content| !content.trim().is_empty())
            .map(|content| StreamEvent::Chunk(content.to_string())),
        Err(e) => {
            tracing::warn!("Skipping malformed stream line: {}", e);
            Some(StreamEvent::Error(format!("Malformed stream line: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_all(lines: &[&str]) -> Vec<StreamEvent> {
        lines.iter().filter_map(|line| parse_line(line)).collect()
    }

    #[test]
    fn test_chunks_then_done() {
        let events = parse_all(&[
            r#"data: {"choices":[{"delta":{"content":"He"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"llo"}}]}"#,
            "data: [DONE]",
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("He".to_string()),
                StreamEvent::Chunk("llo".to_string()),
                StreamEvent::Completed,
            ]
        );
    }

    #[test]
    fn test_malformed_line_between_chunks_is_recoverable() {
        let events = parse_all(&[
            r#"data: {"choices":[{"delta":{"content":"A"}}]}"#,
            r#"data: {"choices":[{"delta":"#,
            r#"data: {"choices":[{"delta":{"content":"B"}}]}"#,
        ]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Chunk("A".to_string()));
        assert!(matches!(events[1], StreamEvent::Error(_)));
        assert_eq!(events[2], StreamEvent::Chunk("B".to_string()));
    }

    #[test]
    fn test_falls_back_to_message_then_raw_content() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"message":{"content":"full"}}]}"#),
            Some(StreamEvent::Chunk("full".to_string()))
        );
        assert_eq!(
            parse_line(r#"data:{"content":"raw"}"#),
            Some(StreamEvent::Chunk("raw".to_string()))
        );
    }

    #[test]
    fn test_ignores_blank_content_and_other_fields() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#),
            None
        );
        assert_eq!(parse_line(r#"data: {"choices":[{"delta":{}}]}"#), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_chunk_keeps_leading_whitespace() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":" world"}}]}"#),
            Some(StreamEvent::Chunk(" world".to_string()))
        );
    }

    #[test]
    fn test_line_buffer_handles_split_lines_and_crlf() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b":1}\r\n\r\ndata: [DO"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(buffer.push(b"NE]\n"), vec!["data: [DONE]"]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_handles_split_utf8() {
        let line = "data: 你好\n".as_bytes();
        let (first, second) = line.split_at(8);
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(first).is_empty());
        assert_eq!(buffer.push(second), vec!["data: 你好"]);
    }

    #[test]
    fn test_line_buffer_finish_returns_trailing_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: [DONE]").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.finish(), None);
    }
}
