//! Reassembles a completion from the proxy's streamed `data: {...}` lines.

use log::debug;
use serde::Deserialize;

use crate::error::MalformedStreamLine;

pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
}

/// One decoded line of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    /// The proxy sends an empty choice where the completion breaks a line.
    LineBreak,
    /// Blank lines, `data: [DONE]` and any other non-JSON line.
    Ignored,
}

impl StreamEvent {
    pub fn decode(line: &str) -> Result<StreamEvent, MalformedStreamLine> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Ok(StreamEvent::Ignored);
        };
        if !payload.starts_with('{') {
            return Ok(StreamEvent::Ignored);
        }

        let malformed = |source: serde_json::Error| MalformedStreamLine {
            line: line.to_string(),
            source,
        };
        let chunk = serde_json::from_str::<CompletionChunk>(payload).map_err(malformed)?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Err(malformed(<serde_json::Error as serde::de::Error>::custom(
                "response has no choices",
            )));
        };

        Ok(match choice.text {
            Some(text) if !text.is_empty() => StreamEvent::Text(text),
            _ => StreamEvent::LineBreak,
        })
    }
}

/// Incremental parser. Feed raw body chunks with [`push`](Self::push); a line
/// cut by a chunk boundary is held back until the rest arrives.
#[derive(Debug, Default)]
pub struct StreamParser {
    residual: Vec<u8>,
    result: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        // The residual holds no newline, so only the new bytes need scanning.
        let held = self.residual.len();
        self.residual.extend_from_slice(chunk);
        let Some(offset) = chunk.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let last_newline = held + offset;

        let rest = self.residual.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.residual, rest);
        for line in complete.split(|&b| b == b'\n') {
            self.process_line(line);
        }
    }

    /// Text assembled so far, not counting a held-back partial line.
    pub fn result(&self) -> &str {
        &self.result
    }

    /// Processes whatever is left in the buffer as a final line.
    pub fn finish(mut self) -> String {
        let residual = std::mem::take(&mut self.residual);
        self.process_line(&residual);
        self.result
    }

    fn process_line(&mut self, line: &[u8]) {
        if line.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(line);
        match StreamEvent::decode(&line) {
            Ok(StreamEvent::Text(text)) => self.result.push_str(&text),
            Ok(StreamEvent::LineBreak) => self.result.push('\n'),
            Ok(StreamEvent::Ignored) => {}
            Err(e) => debug!("Skipping stream line: {e}"),
        }
    }
}

/// Parses a whole response body at once.
pub fn parse(raw: &str) -> String {
    let mut parser = StreamParser::new();
    parser.push(raw.as_bytes());
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(text: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({ "choices": [{ "text": text, "index": 0 }] })
        )
    }

    #[test]
    fn empty_and_malformed_input_yields_empty_string() {
        assert_eq!(parse(""), "");
        assert_eq!(parse("\n\n"), "");
        assert_eq!(parse("data: {not json\ndata: {\"choices\": 3}\n"), "");
        assert_eq!(parse("event: ping\n: keep-alive\ndata: [DONE]\n"), "");
    }

    #[test]
    fn empty_choice_becomes_newline() {
        let body = format!("{}{}{}", data("foo"), data(""), data("bar"));
        assert_eq!(parse(&body), "foo\nbar");
    }

    #[test]
    fn null_text_becomes_newline() {
        let body = "data: {\"choices\":[{\"text\":null}]}\ndata: {\"choices\":[{}]}\n";
        assert_eq!(parse(body), "\n\n");
    }

    #[test]
    fn malformed_line_does_not_abort_parse() {
        let body = format!("{}data: {{\"choices\":[{{\"te\n{}", data("a"), data("b"));
        assert_eq!(parse(&body), "ab");
    }

    #[test]
    fn missing_choices_is_skipped() {
        let body = format!("data: {{\"choices\":[]}}\n{}", data("x"));
        assert_eq!(parse(&body), "x");
    }

    #[test]
    fn chunk_boundary_inside_line_is_buffered() {
        let whole = "data: {\"choices\":[{\"text\":\"ab\"}]}\n";
        let mut parser = StreamParser::new();
        parser.push(b"data: {\"choices\":[{\"te");
        assert_eq!(parser.result(), "");
        parser.push(b"xt\":\"ab\"}]}\n");
        assert_eq!(parser.result(), "ab");
        assert_eq!(parser.finish(), parse(whole));
    }

    #[test]
    fn utf8_split_across_chunks_is_reassembled() {
        let body = data("héllo → wörld");
        let bytes = body.as_bytes();
        let arrow = body.find('→').expect("arrow");

        let mut parser = StreamParser::new();
        parser.push(&bytes[..arrow + 1]);
        parser.push(&bytes[arrow + 1..]);
        assert_eq!(parser.finish(), "héllo → wörld");
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let body = data("tail");
        let mut parser = StreamParser::new();
        parser.push(body.trim_end().as_bytes());
        assert_eq!(parser.result(), "");
        assert_eq!(parser.finish(), "tail");
    }

    #[test]
    fn carriage_returns_are_tolerated() {
        let body = "data: {\"choices\":[{\"text\":\"a\"}]}\r\n\r\ndata: {\"choices\":[{\"text\":\"b\"}]}\r\n";
        assert_eq!(parse(body), "ab");
    }

    #[test]
    fn decode_classifies_lines() {
        assert_eq!(
            StreamEvent::decode("data: {\"choices\":[{\"text\":\"x\"}]}").unwrap(),
            StreamEvent::Text("x".to_string())
        );
        assert_eq!(
            StreamEvent::decode("data: {\"choices\":[{\"text\":\"\"}]}").unwrap(),
            StreamEvent::LineBreak
        );
        assert_eq!(StreamEvent::decode("data: [DONE]").unwrap(), StreamEvent::Ignored);
        assert_eq!(StreamEvent::decode("id: 7").unwrap(), StreamEvent::Ignored);
        assert!(StreamEvent::decode("data: {oops").is_err());
    }

    #[test]
    fn long_line_fed_byte_by_byte() {
        let text = "x".repeat(4096);
        let body = format!("{}{}", data(&text), data("!"));

        let mut parser = StreamParser::new();
        let (first_line, rest) = body.split_at(body.find('\n').expect("newline") + 1);
        for byte in first_line.as_bytes()[..first_line.len() - 1].iter() {
            parser.push(std::slice::from_ref(byte));
        }
        assert_eq!(parser.result(), "");
        assert_eq!(parser.residual.len(), first_line.len() - 1);

        parser.push(b"\n");
        assert_eq!(parser.result(), text);
        assert!(parser.residual.is_empty());

        for byte in rest.as_bytes() {
            parser.push(std::slice::from_ref(byte));
        }
        assert_eq!(parser.finish(), format!("{text}!"));
    }

    #[test]
    fn every_split_point_gives_same_result() {
        let body = format!("{}{}{}data: [DONE]\n", data("fn main"), data(""), data("{}"));
        let expected = parse(&body);
        assert_eq!(expected, "fn main\n{}");

        for split in 0..=body.len() {
            let mut parser = StreamParser::new();
            parser.push(&body.as_bytes()[..split]);
            parser.push(&body.as_bytes()[split..]);
            assert_eq!(parser.finish(), expected, "split at {split}");
        }
    }
}
