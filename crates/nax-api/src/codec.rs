//! Incremental JSON frame decoding for the WebSocket stream.
//!
//! The device does not delimit its messages reliably: one WebSocket
//! message may carry half a JSON document, or several documents back to
//! back, with or without newlines between them. [`FrameDecoder`] keeps an
//! accumulation buffer and peels off every complete JSON value it can,
//! leaving incomplete tails in place until more bytes arrive.
//!
//! Decoded values are then split by [`Frame::classify`] into device state
//! (merged into the local document) and `Actions` acknowledgements (only
//! inspected for failed results).

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

// ── FrameDecoder ─────────────────────────────────────────────────────

/// Reassembles JSON values from arbitrarily split or concatenated reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

enum Step {
    Value(Value, usize),
    Incomplete,
    Malformed(serde_json::Error),
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read to the buffer and return every complete value it
    /// finishes, in stream order.
    ///
    /// Never fails: an incomplete tail is kept for the next call, and a
    /// malformed prefix is logged and skipped up to the next `{`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut values = Vec::new();

        loop {
            self.trim_leading_whitespace();
            if self.buffer.is_empty() {
                break;
            }

            let step = {
                let mut stream =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => Step::Value(value, stream.byte_offset()),
                    Some(Err(e)) if e.is_eof() => Step::Incomplete,
                    Some(Err(e)) => Step::Malformed(e),
                    None => Step::Incomplete,
                }
            };

            match step {
                Step::Value(value, consumed) => {
                    self.buffer.drain(..consumed);
                    values.push(value);
                }
                Step::Incomplete => break,
                Step::Malformed(e) => {
                    warn!(error = %e, buffered = self.buffer.len(), "malformed stream data, resyncing");
                    self.skip_to_next_object();
                }
            }
        }

        values
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn trim_leading_whitespace(&mut self) {
        let start = self
            .buffer
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buffer.len());
        self.buffer.drain(..start);
    }

    fn skip_to_next_object(&mut self) {
        match self.buffer.iter().skip(1).position(|&b| b == b'{') {
            Some(offset) => {
                self.buffer.drain(..=offset);
            }
            None => self.buffer.clear(),
        }
    }
}

// ── Frame classification ─────────────────────────────────────────────

/// A decoded message from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A state fragment to merge into the local document.
    State(Value),
    /// A command acknowledgement envelope (`{"Actions": [...]}`).
    Actions(ActionReport),
}

impl Frame {
    /// Split a decoded value into state or acknowledgement.
    ///
    /// Anything carrying an `Actions` key is an acknowledgement, even if
    /// its shape is unexpected; it is never treated as state.
    pub fn classify(value: Value) -> Self {
        if value.get("Actions").is_none() {
            return Self::State(value);
        }
        match serde_json::from_value::<ActionReport>(value) {
            Ok(report) => Self::Actions(report),
            Err(e) => {
                debug!(error = %e, "unrecognised Actions envelope");
                Self::Actions(ActionReport::default())
            }
        }
    }
}

/// Structured command results echoed by the device after a write.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionReport {
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Action {
    #[serde(default)]
    pub results: Vec<ActionResult>,
}

/// One per-property outcome inside an [`Action`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionResult {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub status_id: Option<Value>,
    #[serde(default)]
    pub status_info: String,
}

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        self.status_info == "OK"
    }
}

impl ActionReport {
    /// Results whose status is anything other than `OK`.
    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.actions
            .iter()
            .flat_map(|action| action.results.iter())
            .filter(|result| !result.is_ok())
    }

    /// Log every failed result. Returns how many were logged.
    pub fn log_failures(&self) -> usize {
        let mut count = 0;
        for result in self.failures() {
            let status_id = result
                .status_id
                .as_ref()
                .map_or_else(|| "null".to_owned(), ToString::to_string);
            error!(
                path = result.path.as_deref().unwrap_or(""),
                property = result.property.as_deref().unwrap_or(""),
                status_id = %status_id,
                status_info = %result.status_info,
                "device rejected action"
            );
            count += 1;
        }
        count
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn single_value_in_one_read() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(br#"{"A":1}"#), vec![json!({"A": 1})]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn value_split_at_every_boundary_decodes_once() {
        let raw = br#"{"A":1}"#;
        for split in 1..raw.len() {
            let mut decoder = FrameDecoder::new();
            let first = decoder.push(&raw[..split]);
            let second = decoder.push(&raw[split..]);
            assert!(first.is_empty(), "split {split}: decoded early");
            assert_eq!(second, vec![json!({"A": 1})], "split {split}");
        }
    }

    #[test]
    fn concatenated_values_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"{\"A\":1}{\"B\":2}\n{\"C\":3}\n");
        assert_eq!(frames, vec![json!({"A": 1}), json!({"B": 2}), json!({"C": 3})]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn complete_value_followed_by_partial_tail() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(br#"{"A":1} {"B":"#);
        assert_eq!(frames, vec![json!({"A": 1})]);
        assert!(decoder.pending() > 0);

        let frames = decoder.push(br#"{"C":true}}"#);
        assert_eq!(frames, vec![json!({"B": {"C": true}})]);
    }

    #[test]
    fn multibyte_utf8_split_across_reads() {
        let raw = r#"{"Name":"Küche"}"#.as_bytes();
        let split = raw.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&raw[..split]).is_empty());
        assert_eq!(decoder.push(&raw[split..]), vec![json!({"Name": "Küche"})]);
    }

    #[test]
    fn malformed_prefix_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(br#"{"A":1x}{"B":2}"#);
        assert_eq!(frames, vec![json!({"B": 2})]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn garbage_without_object_is_dropped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"]]]").is_empty());
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.push(br#"{"A":1}"#), vec![json!({"A": 1})]);
    }

    #[test]
    fn whitespace_only_reads_produce_nothing() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b" \r\n\t").is_empty());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn classify_state_frame() {
        let value = json!({"Device": {"DeviceInfo": {"Name": "NAX"}}});
        assert_eq!(Frame::classify(value.clone()), Frame::State(value));
    }

    #[test]
    fn classify_actions_frame_and_collect_failures() {
        let value = json!({
            "Actions": [{
                "Results": [
                    {"Path": "Device/ZoneOutputs", "Property": "Volume", "StatusId": 0, "StatusInfo": "OK"},
                    {"Path": "Device/ZoneOutputs", "Property": "Mute", "StatusId": 3, "StatusInfo": "Invalid value"}
                ]
            }]
        });
        let Frame::Actions(report) = Frame::classify(value) else {
            panic!("expected Actions frame");
        };
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].property.as_deref(), Some("Mute"));
        assert_eq!(report.log_failures(), 1);
    }

    #[test]
    fn failure_without_status_id_is_still_logged() {
        let value = json!({
            "Actions": [{"Results": [{"Property": "Input", "StatusInfo": "Busy"}]}]
        });
        let Frame::Actions(report) = Frame::classify(value) else {
            panic!("expected Actions frame");
        };
        assert_eq!(report.failures().next().and_then(|r| r.status_id.clone()), None);
        assert_eq!(report.log_failures(), 1);
    }

    #[test]
    fn odd_actions_envelope_is_still_not_state() {
        let frame = Frame::classify(json!({"Actions": "unexpected"}));
        assert_eq!(frame, Frame::Actions(ActionReport::default()));
    }
}
