//! State machine for translating Cohere's line-delimited chat stream into OpenAI chunks.
//!
//! The [`StreamTranslator`] is fed raw upstream bytes in whatever pieces the
//! transport delivers them. It buffers until a line terminator appears, decodes
//! each complete line as one Cohere record, and emits the corresponding
//! `chat.completion.chunk`s followed by a single `[DONE]` sentinel.
//!
//! ```text
//!   Buffering --(line complete)--> Dispatching --(record handled)--> Buffering
//!       |                              |
//!       +--(finish / abort)--> Closed <+--(terminal record)
//! ```

use bytes::BytesMut;

use super::cohere_types::CohereStreamEvent;
use super::openai_types::{ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, FinishReason};
use super::response::{map_finish_reason, new_completion_id, usage_from_billed};
use super::truncate;

/// Literal payload of the stream terminator (`data: [DONE]`).
pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest upstream line accepted, terminator included. Longer lines are dropped.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Accumulating bytes until a line terminator arrives.
    Buffering,
    /// A complete line is being classified and translated.
    Dispatching,
    /// The sentinel has been emitted, or the upstream failed. Input is ignored.
    Closed,
}

/// One downstream SSE payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutput {
    Chunk(ChatCompletionChunk),
    Done,
}

impl StreamOutput {
    /// The `data:` payload for this output.
    pub fn to_sse_data(&self) -> serde_json::Result<String> {
        match self {
            Self::Chunk(chunk) => serde_json::to_string(chunk),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Translates one upstream stream. Not reusable across requests.
///
/// Usage:
///   let mut translator = StreamTranslator::new("gpt-4o");
///   for bytes in upstream_deliveries {
///       for output in translator.feed(&bytes) { /* write as SSE */ }
///   }
///   for output in translator.finish() { /* write as SSE */ }
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    id: String,
    created: i64,
    state: StreamState,
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no line terminator.
    scanned: usize,
    /// Dropping the rest of an oversized line.
    discarding: bool,
    chunks_emitted: usize,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self::with_id(model, new_completion_id(), chrono::Utc::now().timestamp())
    }

    pub fn with_id(model: &str, id: impl Into<String>, created: i64) -> Self {
        Self {
            model: model.to_string(),
            id: id.into(),
            created,
            state: StreamState::Buffering,
            buffer: BytesMut::new(),
            scanned: 0,
            discarding: false,
            chunks_emitted: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Number of chunks emitted so far, not counting the sentinel.
    pub fn chunks_emitted(&self) -> usize {
        self.chunks_emitted
    }

    /// Feed one upstream delivery. Returns the outputs completed by it, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamOutput> {
        let mut out = Vec::new();
        if self.is_closed() {
            return out;
        }

        self.buffer.extend_from_slice(bytes);

        while !self.is_closed() {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.buffer.len();
                break;
            };
            let line = self.buffer.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if line.len() > MAX_LINE_BYTES {
                warn_oversized(line.len());
                continue;
            }
            self.dispatch(&line, &mut out);
        }

        if self.is_closed() {
            self.buffer.clear();
        } else if self.buffer.len() > MAX_LINE_BYTES {
            if !self.discarding {
                warn_oversized(self.buffer.len());
            }
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        out
    }

    /// The upstream ended. Flushes a trailing unterminated line, then guarantees the sentinel.
    pub fn finish(&mut self) -> Vec<StreamOutput> {
        let mut out = Vec::new();
        if self.is_closed() {
            return out;
        }

        if !self.buffer.is_empty() && !self.discarding {
            let line = self.buffer.split();
            self.dispatch(&line, &mut out);
        }

        if !self.is_closed() {
            tracing::debug!("Upstream ended without a terminal record, closing stream");
            out.push(StreamOutput::Done);
            self.close();
        }
        out
    }

    /// The upstream failed. Closes without emitting anything further.
    pub fn abort(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.state = StreamState::Closed;
        self.buffer.clear();
        self.scanned = 0;
    }

    fn dispatch(&mut self, raw: &[u8], out: &mut Vec<StreamOutput>) {
        self.state = StreamState::Dispatching;

        if let Some(event) = decode_line(raw) {
            self.translate_event(event, out);
        }

        if self.state == StreamState::Dispatching {
            self.state = StreamState::Buffering;
        }
    }

    fn translate_event(&mut self, event: CohereStreamEvent, out: &mut Vec<StreamOutput>) {
        if event.is_terminal() {
            let reason = map_finish_reason(event.finish_reason());
            let usage = event.billed_units().map(usage_from_billed);
            out.push(StreamOutput::Chunk(self.make_chunk(
                ChunkDelta::default(),
                Some(reason),
                usage,
            )));
            out.push(StreamOutput::Done);
            self.close();
            return;
        }

        if self.chunks_emitted == 0 {
            if let Some(generation_id) = event.generation_id {
                self.id = generation_id;
            }
        }

        // An empty fragment is still a delta
        if let Some(text) = event.text {
            out.push(StreamOutput::Chunk(self.make_chunk(
                ChunkDelta {
                    content: Some(text),
                },
                None,
                None,
            )));
        }
    }

    fn make_chunk(
        &mut self,
        delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<ChatUsage>,
    ) -> ChatCompletionChunk {
        self.chunks_emitted += 1;
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

/// Classify one line. Accepts bare JSON lines and SSE `data:` lines; blank lines,
/// SSE comments, and other SSE fields carry no record.
fn decode_line(raw: &[u8]) -> Option<CohereStreamEvent> {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping stream line that is not valid UTF-8");
            return None;
        }
    };

    let line = text.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if is_sse_field(line) => return None,
        None => line,
    };

    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, line = %truncate(payload, 200), "Skipping undecodable stream record");
            None
        }
    }
}

fn warn_oversized(len: usize) {
    tracing::warn!(bytes = len, limit = MAX_LINE_BYTES, "Skipping oversized stream line");
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_STREAM: &str = concat!(
        r#"{"is_finished":false,"event_type":"stream-start","generation_id":"gen-1"}"#,
        "\n",
        r#"{"is_finished":false,"event_type":"text-generation","text":"Hel"}"#,
        "\n",
        r#"{"is_finished":false,"event_type":"text-generation","text":"lo"}"#,
        "\n",
        r#"{"is_finished":true,"event_type":"stream-end","finish_reason":"COMPLETE","response":{"text":"Hello","meta":{"billed_units":{"input_tokens":3,"output_tokens":2}}}}"#,
        "\n",
    );

    fn translator() -> StreamTranslator {
        StreamTranslator::with_id("gpt-4o", "chatcmpl-test", 1_700_000_000)
    }

    fn run(deliveries: &[&[u8]]) -> Vec<StreamOutput> {
        let mut t = translator();
        let mut out = Vec::new();
        for bytes in deliveries {
            out.extend(t.feed(bytes));
        }
        out.extend(t.finish());
        out
    }

    fn content(output: &StreamOutput) -> Option<&str> {
        match output {
            StreamOutput::Chunk(c) => c.choices[0].delta.content.as_deref(),
            StreamOutput::Done => None,
        }
    }

    fn finish_reason(output: &StreamOutput) -> Option<FinishReason> {
        match output {
            StreamOutput::Chunk(c) => c.choices[0].finish_reason,
            StreamOutput::Done => None,
        }
    }

    #[test]
    fn test_hello_stream() {
        let out = run(&[HELLO_STREAM.as_bytes()]);

        assert_eq!(out.len(), 4);
        assert_eq!(content(&out[0]), Some("Hel"));
        assert_eq!(finish_reason(&out[0]), None);
        assert_eq!(content(&out[1]), Some("lo"));
        assert_eq!(content(&out[2]), None);
        assert_eq!(finish_reason(&out[2]), Some(FinishReason::Stop));
        assert!(out[3].is_done());

        let StreamOutput::Chunk(last) = &out[2] else {
            panic!("expected final chunk");
        };
        assert_eq!(last.choices[0].delta, ChunkDelta::default());
        assert_eq!(last.usage, Some(ChatUsage::new(3, 2)));
        assert_eq!(last.id, "gen-1");
        assert_eq!(last.model, "gpt-4o");
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let bytes = HELLO_STREAM.as_bytes();
        let expected = run(&[bytes]);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(run(&[a, b]), expected, "split at {split}");
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(run(&singles), expected);

        let sevens: Vec<&[u8]> = bytes.chunks(7).collect();
        assert_eq!(run(&sevens), expected);
    }

    #[test]
    fn test_chunk_boundary_invariance_many_cuts() {
        let bytes = HELLO_STREAM.as_bytes();
        let expected = run(&[bytes]);

        // Small LCG so the cut sets are arbitrary but reproducible
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: usize| {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (seed >> 33) as usize % bound
        };

        for round in 0..200 {
            let cut_count = 3 + next(6);
            let mut cuts: Vec<usize> = (0..cut_count).map(|_| next(bytes.len() + 1)).collect();
            cuts.sort_unstable();

            let mut pieces = Vec::with_capacity(cut_count + 1);
            let mut start = 0;
            for cut in &cuts {
                pieces.push(&bytes[start..*cut]);
                start = *cut;
            }
            pieces.push(&bytes[start..]);

            assert_eq!(run(&pieces), expected, "round {round}, cuts {cuts:?}");
        }
    }

    fn oversized_line() -> Vec<u8> {
        let mut line = b"{\"event_type\":\"text-generation\",\"text\":\"".to_vec();
        line.resize(MAX_LINE_BYTES + 10, b'x');
        line.extend_from_slice(b"\"}\n");
        line
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let big = oversized_line();
        let next = b"{\"event_type\":\"text-generation\",\"text\":\"after\"}\n";

        let whole = run(&[big.as_slice(), next.as_slice()]);
        assert_eq!(whole.len(), 2);
        assert_eq!(content(&whole[0]), Some("after"));
        assert!(whole[1].is_done());

        let mut pieces: Vec<&[u8]> = big.chunks(4096).collect();
        pieces.push(next.as_slice());
        assert_eq!(run(&pieces), whole);
    }

    #[test]
    fn test_unterminated_input_is_bounded() {
        let mut t = translator();
        let piece = vec![b'x'; 64 * 1024];
        for _ in 0..48 {
            assert!(t.feed(&piece).is_empty());
            assert!(t.buffer.len() <= MAX_LINE_BYTES);
        }
        assert!(t.discarding);

        let out = t.feed(b"tail\n{\"event_type\":\"text-generation\",\"text\":\"ok\"}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(content(&out[0]), Some("ok"));
        assert_eq!(t.finish(), vec![StreamOutput::Done]);
    }

    #[test]
    fn test_multibyte_text_split_across_deliveries() {
        let line = "{\"event_type\":\"text-generation\",\"text\":\"héllo ✓\"}\n";
        let bytes = line.as_bytes();
        let check_mark = line.find('✓').unwrap();

        let out = run(&[&bytes[..check_mark + 1], &bytes[check_mark + 1..]]);
        assert_eq!(content(&out[0]), Some("héllo ✓"));
        assert!(out[1].is_done());
    }

    #[test]
    fn test_exactly_one_sentinel() {
        let mut t = translator();
        let mut out = t.feed(HELLO_STREAM.as_bytes());
        assert!(t.is_closed());

        out.extend(t.feed(b"{\"event_type\":\"text-generation\",\"text\":\"late\"}\n"));
        out.extend(t.finish());
        out.extend(t.finish());

        assert_eq!(out.iter().filter(|o| o.is_done()).count(), 1);
        assert!(out.iter().all(|o| content(o) != Some("late")));
    }

    #[test]
    fn test_upstream_end_without_terminal_record() {
        let mut t = translator();
        let out = t.feed(b"{\"event_type\":\"text-generation\",\"text\":\"partial\"}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(t.state(), StreamState::Buffering);

        let tail = t.finish();
        assert_eq!(tail, vec![StreamOutput::Done]);
        assert!(t.is_closed());
        assert!(t.finish().is_empty());
    }

    #[test]
    fn test_trailing_line_without_newline_is_dispatched() {
        let out = run(&[
            b"{\"event_type\":\"text-generation\",\"text\":\"a\"}\n",
            b"{\"is_finished\":true,\"event_type\":\"stream-end\",\"finish_reason\":\"MAX_TOKENS\"}",
        ]);

        assert_eq!(out.len(), 3);
        assert_eq!(finish_reason(&out[1]), Some(FinishReason::Length));
        assert!(out[2].is_done());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let out = run(&[
            b"{not json\n",
            b"42\n",
            b"{\"event_type\":\"text-generation\",\"text\":\"ok\"}\n",
        ]);

        assert_eq!(out.len(), 2);
        assert_eq!(content(&out[0]), Some("ok"));
        assert!(out[1].is_done());
    }

    #[test]
    fn test_empty_text_is_a_delta() {
        let out = run(&[b"{\"event_type\":\"text-generation\",\"text\":\"\"}\n"]);

        assert_eq!(out.len(), 2);
        assert_eq!(content(&out[0]), Some(""));
    }

    #[test]
    fn test_non_text_records_emit_nothing() {
        let mut t = translator();
        let out = t.feed(
            b"{\"is_finished\":false,\"event_type\":\"stream-start\",\"generation_id\":\"g\"}\n\r\n\n",
        );
        assert!(out.is_empty());
        assert_eq!(t.chunks_emitted(), 0);
    }

    #[test]
    fn test_generation_id_only_adopted_before_first_chunk() {
        let out = run(&[
            b"{\"event_type\":\"text-generation\",\"text\":\"a\"}\n",
            b"{\"event_type\":\"stream-start\",\"generation_id\":\"late-id\"}\n",
            b"{\"event_type\":\"text-generation\",\"text\":\"b\"}\n",
        ]);

        for output in &out {
            if let StreamOutput::Chunk(c) = output {
                assert_eq!(c.id, "chatcmpl-test");
            }
        }
    }

    #[test]
    fn test_sse_framed_records() {
        let out = run(&[
            b": keep-alive\n",
            b"event: text-generation\n",
            b"data: {\"event_type\":\"text-generation\",\"text\":\"hi\"}\n\n",
            b"data: {\"is_finished\":true,\"finish_reason\":\"ERROR_TOXIC\"}\n\n",
        ]);

        assert_eq!(out.len(), 3);
        assert_eq!(content(&out[0]), Some("hi"));
        assert_eq!(finish_reason(&out[1]), Some(FinishReason::Stop));
        assert!(out[2].is_done());
    }

    #[test]
    fn test_terminal_record_without_billing_has_no_usage() {
        let out = run(&[b"{\"is_finished\":true,\"event_type\":\"stream-end\"}\n"]);

        let StreamOutput::Chunk(chunk) = &out[0] else {
            panic!("expected final chunk");
        };
        assert!(chunk.usage.is_none());
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_abort_emits_nothing() {
        let mut t = translator();
        t.feed(b"{\"event_type\":\"text-generation\",\"text\":\"a\"}\n{\"event");
        t.abort();

        assert!(t.is_closed());
        assert!(t.finish().is_empty());
        assert!(t.feed(b"\n").is_empty());
    }

    #[test]
    fn test_sse_data_payloads() {
        assert_eq!(StreamOutput::Done.to_sse_data().unwrap(), "[DONE]");

        let out = run(&[b"{\"event_type\":\"text-generation\",\"text\":\"x\"}\n"]);
        let data = out[0].to_sse_data().unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "x");
        assert!(value["choices"][0]["finish_reason"].is_null());
    }
}
