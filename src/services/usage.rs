//! Usage parser
//!
//! Recovers token counts from upstream responses of either dialect. A
//! complete JSON body is decoded in one go; an event stream is fed chunk by
//! chunk into [`SseUsageTracker`], which splits it into events and merges
//! their usage last-writer-wins. Nothing here ever fails: degraded input
//! yields a partial [`ParsedUsage`] with `complete == false`.

use crate::models::anthropic::{AnthropicMessage, AnthropicStreamEvent};
use crate::models::openai::OpenAICompletion;
use crate::models::{Dialect, TokenUsage, UsagePatch};
use serde_json::Value;
use tracing::{debug, trace};

/// Dialect-neutral view of one decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Anthropic `message_start`: model, id and the opening usage totals
    MessageStart {
        id: Option<String>,
        model: Option<String>,
        usage: Option<UsagePatch>,
    },
    /// Anthropic content block events
    ContentDelta,
    /// Anthropic `message_delta`, carrying the final output count
    MessageDelta { usage: Option<UsagePatch> },
    MessageStop,
    /// OpenAI-compatible chunk; only the final one usually carries usage
    Chunk {
        id: Option<String>,
        model: Option<String>,
        usage: Option<UsagePatch>,
    },
    /// Keep-alives, error frames and event types this parser does not know
    Ignored,
}

impl StreamEvent {
    /// Decode one `data:` payload. `None` means the payload was not valid JSON
    /// for the dialect.
    pub fn decode(dialect: Dialect, data: &[u8]) -> Option<StreamEvent> {
        match dialect {
            Dialect::Anthropic => {
                let event: AnthropicStreamEvent = serde_json::from_slice(data).ok()?;
                Some(match event {
                    AnthropicStreamEvent::MessageStart { message } => StreamEvent::MessageStart {
                        id: message.id,
                        model: message.model,
                        usage: message.usage.map(UsagePatch::from),
                    },
                    AnthropicStreamEvent::ContentBlockStart
                    | AnthropicStreamEvent::ContentBlockDelta
                    | AnthropicStreamEvent::ContentBlockStop => StreamEvent::ContentDelta,
                    AnthropicStreamEvent::MessageDelta { usage } => StreamEvent::MessageDelta {
                        usage: usage.map(UsagePatch::from),
                    },
                    AnthropicStreamEvent::MessageStop => StreamEvent::MessageStop,
                    AnthropicStreamEvent::Ping
                    | AnthropicStreamEvent::Error
                    | AnthropicStreamEvent::Unknown => StreamEvent::Ignored,
                })
            }
            Dialect::OpenAiCompatible => {
                let chunk: OpenAICompletion = serde_json::from_slice(data).ok()?;
                Some(StreamEvent::Chunk {
                    id: chunk.id,
                    model: chunk.model,
                    usage: chunk.usage.map(UsagePatch::from),
                })
            }
        }
    }
}

/// Best-effort usage extracted from one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUsage {
    pub model: Option<String>,
    pub response_id: Option<String>,
    pub usage: TokenUsage,
    /// False when extraction could not see the whole response or found no usage
    pub complete: bool,
}

/// Running state shared by both parse modes
#[derive(Debug, Default)]
struct UsageAccumulator {
    model: Option<String>,
    response_id: Option<String>,
    patch: UsagePatch,
    saw_usage: bool,
}

impl UsageAccumulator {
    fn note_identity(&mut self, id: Option<String>, model: Option<String>) {
        if self.model.is_none() {
            self.model = model.filter(|m| !m.is_empty());
        }
        if self.response_id.is_none() {
            self.response_id = id.filter(|i| !i.is_empty());
        }
    }

    fn note_usage(&mut self, usage: Option<UsagePatch>) {
        if let Some(patch) = usage {
            self.patch = self.patch.merge(patch);
            self.saw_usage = true;
        }
    }

    fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::MessageStart { id, model, usage } | StreamEvent::Chunk { id, model, usage } => {
                self.note_identity(id, model);
                self.note_usage(usage);
            }
            StreamEvent::MessageDelta { usage } => self.note_usage(usage),
            StreamEvent::ContentDelta | StreamEvent::MessageStop | StreamEvent::Ignored => {}
        }
    }

    fn finish(self, complete: bool) -> ParsedUsage {
        ParsedUsage {
            model: self.model,
            response_id: self.response_id,
            usage: self.patch.resolve(),
            complete,
        }
    }
}

/// Parse a complete (non-streamed) response body
///
/// Valid JSON without a usage object resolves to zero usage and counts as
/// complete. Anything that is not JSON is incomplete.
pub fn parse_body(dialect: Dialect, body: &[u8]) -> ParsedUsage {
    let mut acc = UsageAccumulator::default();

    let value = match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Response body is not a {} JSON payload: {}", dialect, e);
            return acc.finish(false);
        }
    };

    // Field types are decoded leniently, so only a non-object document lands in the default
    match dialect {
        Dialect::Anthropic => {
            let message = serde_json::from_value::<AnthropicMessage>(value).unwrap_or_default();
            acc.note_identity(message.id, message.model);
            acc.note_usage(message.usage.map(UsagePatch::from));
        }
        Dialect::OpenAiCompatible => {
            let completion = serde_json::from_value::<OpenAICompletion>(value).unwrap_or_default();
            acc.note_identity(completion.id, completion.model);
            acc.note_usage(completion.usage.map(UsagePatch::from));
        }
    }

    acc.finish(true)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Incremental Server-Sent-Events usage tracker
///
/// Lines may be split across chunks arbitrarily. The pending partial line and
/// the data of the event being assembled are both bounded by `max_buffer`;
/// when either overflows the offending event is discarded and the result is
/// marked incomplete.
#[derive(Debug)]
pub struct SseUsageTracker {
    dialect: Dialect,
    max_buffer: usize,
    buffer: Vec<u8>,
    current_data: Vec<u8>,
    /// Discard input up to the next newline
    skip_line: bool,
    overflowed: bool,
    events: usize,
    malformed: usize,
    acc: UsageAccumulator,
}

impl SseUsageTracker {
    pub fn new(dialect: Dialect, max_buffer: usize) -> Self {
        Self {
            dialect,
            max_buffer,
            buffer: Vec::new(),
            current_data: Vec::new(),
            skip_line: false,
            overflowed: false,
            events: 0,
            malformed: 0,
            acc: UsageAccumulator::default(),
        }
    }

    pub fn ingest_chunk(&mut self, chunk: &[u8]) {
        let mut start = 0usize;

        for (idx, b) in chunk.iter().enumerate() {
            if *b != b'\n' {
                continue;
            }

            if self.skip_line {
                self.skip_line = false;
                self.buffer.clear();
            } else if self.buffer.is_empty() {
                self.ingest_line(&chunk[start..idx]);
            } else {
                let mut line = std::mem::take(&mut self.buffer);
                line.extend_from_slice(&chunk[start..idx]);
                self.ingest_line(&line);
            }
            start = idx + 1;
        }

        if start < chunk.len() && !self.skip_line {
            self.buffer.extend_from_slice(&chunk[start..]);
            if self.buffer.len() > self.max_buffer {
                debug!("SSE line exceeds {} bytes, discarding it", self.max_buffer);
                self.overflowed = true;
                self.skip_line = true;
                self.buffer.clear();
                self.current_data.clear();
            }
        }
    }

    fn ingest_line(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.is_empty() {
            self.flush_event();
            return;
        }

        // Comments and `event:`/`id:`/`retry:` fields; the JSON payload carries its own type
        if line[0] == b':' {
            return;
        }

        if let Some(rest) = line.strip_prefix(b"data:") {
            let rest = rest.strip_prefix(b" ").unwrap_or(rest);
            if trim_ascii(rest) == b"[DONE]" {
                return;
            }

            if self.current_data.len() + rest.len() + 1 > self.max_buffer {
                debug!("SSE event data exceeds {} bytes, discarding it", self.max_buffer);
                self.overflowed = true;
                self.current_data.clear();
                return;
            }

            if !self.current_data.is_empty() {
                self.current_data.push(b'\n');
            }
            self.current_data.extend_from_slice(rest);
        }
    }

    fn flush_event(&mut self) {
        if self.current_data.is_empty() {
            return;
        }

        let data = std::mem::take(&mut self.current_data);
        self.events += 1;

        match StreamEvent::decode(self.dialect, &data) {
            Some(event) => {
                trace!("SSE event: {:?}", event);
                self.acc.apply(event);
            }
            None => {
                self.malformed += 1;
                debug!("Skipping undecodable {} SSE event ({} bytes)", self.dialect, data.len());
            }
        }
    }

    /// Number of events seen so far, decodable or not
    pub fn events(&self) -> usize {
        self.events
    }

    /// Flush any trailing event and produce the result
    ///
    /// A stream that ends without a blank line after its last event still has
    /// that event counted.
    pub fn finalize(mut self) -> ParsedUsage {
        if !self.buffer.is_empty() && !self.skip_line {
            let tail = std::mem::take(&mut self.buffer);
            self.ingest_line(&tail);
        }
        self.flush_event();

        if self.malformed > 0 {
            debug!("{} of {} SSE events could not be decoded", self.malformed, self.events);
        }

        let complete = self.acc.saw_usage && !self.overflowed;
        self.acc.finish(complete)
    }
}

/// Per-response accumulation strategy, chosen once the response headers are known
#[derive(Debug)]
pub enum UsageCollector {
    /// Whole body buffered up to `cap`, parsed at end of stream
    Buffered {
        dialect: Dialect,
        buffer: Vec<u8>,
        cap: usize,
        overflowed: bool,
    },
    /// Event stream parsed incrementally
    Streaming(SseUsageTracker),
}

impl UsageCollector {
    pub fn new(dialect: Dialect, streamed: bool, cap: usize) -> Self {
        if streamed {
            UsageCollector::Streaming(SseUsageTracker::new(dialect, cap))
        } else {
            UsageCollector::Buffered {
                dialect,
                buffer: Vec::new(),
                cap,
                overflowed: false,
            }
        }
    }

    pub fn ingest(&mut self, chunk: &[u8]) {
        match self {
            UsageCollector::Buffered {
                buffer,
                cap,
                overflowed,
                ..
            } => {
                if *overflowed {
                    return;
                }
                if buffer.len() + chunk.len() > *cap {
                    debug!("Response body exceeds parse buffer of {} bytes", cap);
                    *overflowed = true;
                    *buffer = Vec::new();
                    return;
                }
                buffer.extend_from_slice(chunk);
            }
            UsageCollector::Streaming(tracker) => tracker.ingest_chunk(chunk),
        }
    }

    pub fn finish(self) -> ParsedUsage {
        match self {
            UsageCollector::Buffered {
                overflowed: true, ..
            } => ParsedUsage::default(),
            UsageCollector::Buffered { dialect, buffer, .. } => parse_body(dialect, &buffer),
            UsageCollector::Streaming(tracker) => {
                trace!("Event stream closed after {} events", tracker.events());
                tracker.finalize()
            }
        }
    }
}
