use crate::event::StatusEvent;
use crate::status::StatusCode;

/// Incremental decoder for the status channel.
///
/// Bytes arrive in arbitrary chunks; the parser splits them on `\n`,
/// carrying a partial trailing line across [`feed`](Self::feed) calls.
/// One parser instance serves exactly one session and is not restartable.
#[derive(Debug, Default)]
pub struct StatusParser {
    partial: Vec<u8>,
}

impl StatusParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk of status bytes, returning one event per completed
    /// line, in arrival order. Never blocks, never fails: lines that do not
    /// match the `<marker> <KEYWORD> [payload]` shape or carry a keyword we
    /// do not know decode as [`StatusCode::Unknown`].
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                let line = std::mem::take(&mut self.partial);
                events.push(decode_line(&line));
            } else {
                self.partial.push(b);
            }
        }
        events
    }

    /// Flushes an unterminated trailing line, if any. Called once at
    /// end-of-stream.
    pub fn finish(&mut self) -> Option<StatusEvent> {
        if self.partial.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial);
        Some(decode_line(&line))
    }

    /// Bytes of the unterminated trailing line held right now.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}

fn decode_line(line: &[u8]) -> StatusEvent {
    let mut line = String::from_utf8_lossy(line).into_owned();
    if line.ends_with('\r') {
        line.pop();
    }
    // First token is the line marker (`[GNUPG:]` in practice); it is
    // discarded whatever it is, to stay tolerant of protocol variants.
    let (keyword, payload) = {
        let mut parts = line.splitn(3, ' ');
        let _marker = parts.next().unwrap_or("");
        (
            parts.next().unwrap_or("").to_string(),
            parts.next().unwrap_or("").to_string(),
        )
    };
    StatusEvent {
        code: StatusCode::from_name(&keyword),
        keyword,
        payload,
        raw: line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&[u8]]) -> Vec<StatusEvent> {
        let mut parser = StatusParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk));
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn decodes_basic_lines() {
        let events = feed_all(&[b"[GNUPG:] GOODSIG ABCD1234 Alice\n[GNUPG:] TRUST_ULTIMATE 0\n"]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].code, StatusCode::GoodSig);
        assert_eq!(events[0].payload, "ABCD1234 Alice");
        assert_eq!(events[1].code, StatusCode::TrustUltimate);
    }

    #[test]
    fn marker_is_discarded_whatever_it_is() {
        let events = feed_all(&[b"* NEED_PASSPHRASE 1 2 3\n"]);
        assert_eq!(events[0].code, StatusCode::NeedPassphrase);
        assert_eq!(events[0].payload, "1 2 3");
    }

    #[test]
    fn partial_line_carries_across_feeds() {
        let mut parser = StatusParser::new();
        assert!(parser.feed(b"[GNUPG:] GET_HID").is_empty());
        assert_eq!(parser.pending(), b"[GNUPG:] GET_HID");
        let events = parser.feed(b"DEN passphrase.enter\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, StatusCode::GetHidden);
        assert_eq!(events[0].payload, "passphrase.enter");
        assert!(parser.finish().is_none());
    }

    #[test]
    fn unterminated_tail_flushes_on_finish() {
        let mut parser = StatusParser::new();
        assert!(parser.feed(b"[GNUPG:] PROGRESS half").is_empty());
        let tail = parser.finish().unwrap();
        assert_eq!(tail.code, StatusCode::Progress);
        assert_eq!(tail.payload, "half");
    }

    #[test]
    fn unknown_and_malformed_lines_survive() {
        let events = feed_all(&[b"[GNUPG:] SHINY_NEW_THING a b\njust-one-token\n\n"]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].code, StatusCode::Unknown);
        assert_eq!(events[0].keyword, "SHINY_NEW_THING");
        assert_eq!(events[1].code, StatusCode::Unknown);
        assert_eq!(events[1].keyword, "");
        assert_eq!(events[2].raw, "");
    }

    #[test]
    fn crlf_terminators_are_tolerated() {
        let events = feed_all(&[b"[GNUPG:] GOT_IT\r\n"]);
        assert_eq!(events[0].code, StatusCode::GotIt);
        assert_eq!(events[0].raw, "[GNUPG:] GOT_IT");
    }

    // Event count equals newline count plus one for a trailing partial,
    // and the raw lines concatenate back to the input minus terminators.
    #[test]
    fn count_and_reconstruction_property() {
        let inputs: &[&[u8]] = &[
            b"[GNUPG:] A 1\n[GNUPG:] B 2\n",
            b"[GNUPG:] A 1\n[GNUPG:] B 2\ntail",
            b"",
            b"\n\n\n",
            b"no newline at all",
        ];
        for input in inputs {
            let newline_count = input.iter().filter(|&&b| b == b'\n').count();
            let has_tail = !input.is_empty() && input.last() != Some(&b'\n');
            let events = feed_all(&[input]);
            assert_eq!(events.len(), newline_count + usize::from(has_tail));

            let rebuilt: Vec<u8> = events
                .iter()
                .flat_map(|e| e.raw.as_bytes().iter().copied().chain(std::iter::once(b'\n')))
                .collect();
            let mut expected = input.to_vec();
            if has_tail {
                expected.push(b'\n');
            }
            assert_eq!(rebuilt, expected);
        }
    }
}
