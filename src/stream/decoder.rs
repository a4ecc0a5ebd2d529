//! Incremental framing of the generation response body.
//!
//! The server sends newline-delimited JSON records, but the HTTP body
//! arrives in chunks split at arbitrary byte boundaries, possibly inside a
//! record, possibly inside a multi-byte UTF-8 sequence. The decoder buffers
//! raw bytes across chunks and only ever parses complete lines; a trailing
//! partial line waits for the next chunk.

use serde::Deserialize;
use tracing::warn;

/// One structured event decoded from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A piece of generated text, in order.
    TextFragment(String),
    /// The server reported a failure mid-stream.
    StreamError(String),
    /// Normal completion marker.
    StreamDone,
}

/// Wire shape of one response line. Field presence resolves the variant;
/// serde rejects a non-boolean `done` at the decode boundary.
#[derive(Debug, Deserialize)]
struct GenerateFrame {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Whether a terminal event (`StreamDone` or `StreamError`) was produced.
    /// Source EOF before this is a protocol violation the caller surfaces.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one body chunk, returning every event it completes.
    ///
    /// Event order within and across calls matches record order on the
    /// wire. Input after a terminal event is discarded.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while !self.finished {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let Some(frame) = parse_line(&line[..line.len() - 1]) else {
                continue;
            };

            if let Some(message) = frame.error {
                events.push(ProtocolEvent::StreamError(message));
                self.finished = true;
                break;
            }
            if let Some(text) = frame.response {
                if !text.is_empty() {
                    events.push(ProtocolEvent::TextFragment(text));
                }
            }
            if frame.done {
                events.push(ProtocolEvent::StreamDone);
                self.finished = true;
            }
        }

        if self.finished {
            self.buffer.clear();
        }
        events
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one complete line. Blank lines yield nothing; malformed lines are
/// logged and dropped; one bad frame must not kill a healthy stream.
fn parse_line(line: &[u8]) -> Option<GenerateFrame> {
    let text = match std::str::from_utf8(line) {
        Ok(t) => t.trim(),
        Err(e) => {
            warn!(error = %e, "Dropping non-UTF-8 stream line");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateFrame>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, line = %text, "Dropping malformed stream line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_in_chunks(chunks: &[&[u8]]) -> Vec<ProtocolEvent> {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push_chunk(chunk));
        }
        events
    }

    #[test]
    fn decodes_fragments_and_done() {
        let events = decode_in_chunks(&[b"{\"response\":\"Hel\"}\n{\"response\":\"lo\"}\n{\"done\":true}\n"]);
        assert_eq!(
            events,
            vec![
                ProtocolEvent::TextFragment("Hel".to_string()),
                ProtocolEvent::TextFragment("lo".to_string()),
                ProtocolEvent::StreamDone,
            ]
        );
    }

    #[test]
    fn record_split_across_chunks() {
        // The exact case from the wire: a record cut mid-key.
        let events = decode_in_chunks(&[b"{\"resp", b"onse\":\"Hi\"}\n{\"done\":true}\n"]);
        assert_eq!(
            events,
            vec![
                ProtocolEvent::TextFragment("Hi".to_string()),
                ProtocolEvent::StreamDone,
            ]
        );
    }

    #[test]
    fn split_invariance_over_all_two_way_splits() {
        let input: &[u8] =
            b"{\"response\":\"a\"}\n{\"response\":\"b\"}\n{\"response\":\"c\"}\n{\"done\":true}\n";
        let expected = decode_in_chunks(&[input]);
        assert_eq!(expected.len(), 4);
        for split in 0..=input.len() {
            let (left, right) = input.split_at(split);
            assert_eq!(
                decode_in_chunks(&[left, right]),
                expected,
                "split at byte {} changed the event sequence",
                split
            );
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let input: &[u8] = "{\"response\":\"héllo → wörld\"}\n{\"done\":true}\n".as_bytes();
        let expected = decode_in_chunks(&[input]);
        let singles: Vec<&[u8]> = input.chunks(1).collect();
        assert_eq!(decode_in_chunks(&singles), expected);
    }

    #[test]
    fn multibyte_utf8_split_does_not_corrupt_text() {
        let line = "{\"response\":\"héllo\"}\n{\"done\":true}\n".as_bytes();
        // Split inside the two-byte 'é' sequence.
        let split = line.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let events = decode_in_chunks(&[&line[..split], &line[split..]]);
        assert_eq!(
            events[0],
            ProtocolEvent::TextFragment("héllo".to_string())
        );
    }

    #[test]
    fn malformed_line_is_dropped_stream_continues() {
        let events = decode_in_chunks(&[b"not json at all\n{\"response\":\"ok\"}\n{\"done\":true}\n"]);
        assert_eq!(
            events,
            vec![
                ProtocolEvent::TextFragment("ok".to_string()),
                ProtocolEvent::StreamDone,
            ]
        );
    }

    #[test]
    fn non_boolean_done_is_malformed() {
        let events = decode_in_chunks(&[b"{\"done\":\"yes\"}\n{\"done\":true}\n"]);
        assert_eq!(events, vec![ProtocolEvent::StreamDone]);
    }

    #[test]
    fn blank_lines_yield_nothing() {
        let events = decode_in_chunks(&[b"\n\n{\"done\":true}\n"]);
        assert_eq!(events, vec![ProtocolEvent::StreamDone]);
    }

    #[test]
    fn empty_response_field_yields_no_fragment() {
        let events = decode_in_chunks(&[b"{\"response\":\"\",\"done\":true}\n"]);
        assert_eq!(events, vec![ProtocolEvent::StreamDone]);
    }

    #[test]
    fn final_record_may_carry_text_and_done() {
        let events = decode_in_chunks(&[b"{\"response\":\"bye\",\"done\":true}\n"]);
        assert_eq!(
            events,
            vec![
                ProtocolEvent::TextFragment("bye".to_string()),
                ProtocolEvent::StreamDone,
            ]
        );
    }

    #[test]
    fn error_frame_terminates_stream() {
        let events =
            decode_in_chunks(&[b"{\"response\":\"a\"}\n{\"error\":\"model not loaded\"}\n"]);
        assert_eq!(
            events,
            vec![
                ProtocolEvent::TextFragment("a".to_string()),
                ProtocolEvent::StreamError("model not loaded".to_string()),
            ]
        );
    }

    #[test]
    fn no_events_after_terminal() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push_chunk(b"{\"done\":true}\n{\"response\":\"late\"}\n");
        assert_eq!(events, vec![ProtocolEvent::StreamDone]);
        assert!(decoder.is_finished());
        assert!(decoder.push_chunk(b"{\"response\":\"later\"}\n").is_empty());
    }

    #[test]
    fn trailing_partial_line_is_never_parsed_early() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_chunk(b"{\"response\":\"hi\"}").is_empty());
        assert!(!decoder.is_finished());
        let events = decoder.push_chunk(b"\n{\"done\":true}\n");
        assert_eq!(
            events,
            vec![
                ProtocolEvent::TextFragment("hi".to_string()),
                ProtocolEvent::StreamDone,
            ]
        );
    }
}
