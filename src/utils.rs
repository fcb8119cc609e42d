//! Streaming utilities: SSE parsing and incremental content-block aggregation.
//!
//! This module addresses two challenges inherited from the original SDK's
//! `utils`, reshaped for a provider that interleaves thinking with text and
//! tool use:
//!
//! # SSE parsing
//!
//! [`parse_provider_stream`] turns a raw HTTP streaming response into a
//! stream of [`ProviderStreamEvent`]s, one per `data: ` line, skipping the
//! `[DONE]` sentinel the same way the original chat-completions parser did.
//!
//! # Incremental aggregation
//!
//! The original `ToolCallAggregator` only ever emitted content at
//! `finish_reason` — fine for a batch client, wrong for a system whose Event
//! Bus (spec §4.8) must forward thinking and text to subscribers as they
//! arrive. [`ContentBlockAggregator`] keeps that same per-index accumulation
//! strategy (tool call arguments still arrive as split JSON strings) but
//! emits a [`StreamEvent`] for every delta, and only batches at
//! `content_block_stop` / `message_stop` to assemble the final
//! [`ContentBlock`]s the Tool Loop appends to history.

use crate::types::{
    ContentBlock, ContentBlockDeltaPayload, ContentBlockStartPayload, ProviderStreamEvent,
    TextBlock, ThinkingBlock, ToolUseBlock, Usage,
};
use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

/// An incremental event surfaced to the Event Bus while a call streams.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of the model's reasoning trace.
    ThinkingDelta(String),
    /// A chunk of the model's visible response.
    TextDelta(String),
    /// The model began requesting a tool call; arguments are still arriving.
    ToolUseStarted { id: String, name: String },
    /// A tool call's arguments finished streaming and parsed successfully.
    ToolUseCompleted(ToolUseBlock),
    /// The call finished; carries the stop reason and cumulative usage.
    MessageComplete {
        stop_reason: Option<String>,
        usage: Usage,
    },
}

#[derive(Debug, Default)]
struct PartialTextBlock {
    buffer: String,
}

#[derive(Debug, Default)]
struct PartialThinkingBlock {
    buffer: String,
}

#[derive(Debug, Default)]
struct PartialToolUse {
    id: String,
    name: String,
    arguments: String,
}

enum PartialBlock {
    Text(PartialTextBlock),
    Thinking(PartialThinkingBlock),
    ToolUse(PartialToolUse),
}

/// Accumulates a single streamed call into final [`ContentBlock`]s while
/// surfacing every delta as a [`StreamEvent`] as it arrives.
///
/// Reused across every Streaming Runner call; construct a fresh instance per
/// call and call [`Self::finish`] once the stream yields `message_stop`.
#[derive(Default)]
pub struct ContentBlockAggregator {
    open: HashMap<usize, PartialBlock>,
    completed: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl ContentBlockAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one provider stream event, returning the [`StreamEvent`]s it
    /// produces (zero, one, or — for `content_block_stop` — exactly one
    /// completion event when the block had content).
    pub fn process_event(&mut self, event: ProviderStreamEvent) -> Result<Vec<StreamEvent>> {
        match event {
            ProviderStreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                Ok(Vec::new())
            }
            ProviderStreamEvent::ContentBlockStart { index, content_block } => {
                match content_block {
                    ContentBlockStartPayload::Text { text } => {
                        self.open.insert(
                            index,
                            PartialBlock::Text(PartialTextBlock { buffer: text }),
                        );
                        Ok(Vec::new())
                    }
                    ContentBlockStartPayload::Thinking { thinking } => {
                        self.open.insert(
                            index,
                            PartialBlock::Thinking(PartialThinkingBlock { buffer: thinking }),
                        );
                        Ok(Vec::new())
                    }
                    ContentBlockStartPayload::ToolUse { id, name } => {
                        self.open.insert(
                            index,
                            PartialBlock::ToolUse(PartialToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                arguments: String::new(),
                            }),
                        );
                        Ok(vec![StreamEvent::ToolUseStarted { id, name }])
                    }
                }
            }
            ProviderStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDeltaPayload::TextDelta { text } => {
                    if let Some(PartialBlock::Text(block)) = self.open.get_mut(&index) {
                        block.buffer.push_str(&text);
                    }
                    Ok(vec![StreamEvent::TextDelta(text)])
                }
                ContentBlockDeltaPayload::ThinkingDelta { thinking } => {
                    if let Some(PartialBlock::Thinking(block)) = self.open.get_mut(&index) {
                        block.buffer.push_str(&thinking);
                    }
                    Ok(vec![StreamEvent::ThinkingDelta(thinking)])
                }
                ContentBlockDeltaPayload::InputJsonDelta { partial_json } => {
                    if let Some(PartialBlock::ToolUse(block)) = self.open.get_mut(&index) {
                        block.arguments.push_str(&partial_json);
                    }
                    Ok(Vec::new())
                }
            },
            ProviderStreamEvent::ContentBlockStop { index } => {
                let Some(block) = self.open.remove(&index) else {
                    return Ok(Vec::new());
                };
                match block {
                    PartialBlock::Text(b) => {
                        if !b.buffer.is_empty() {
                            self.completed.push(ContentBlock::Text(TextBlock::new(b.buffer)));
                        }
                        Ok(Vec::new())
                    }
                    PartialBlock::Thinking(b) => {
                        if !b.buffer.is_empty() {
                            self.completed
                                .push(ContentBlock::Thinking(ThinkingBlock::new(b.buffer)));
                        }
                        Ok(Vec::new())
                    }
                    PartialBlock::ToolUse(b) => {
                        let input: serde_json::Value = if b.arguments.trim().is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&b.arguments).map_err(|e| {
                                Error::schema(format!(
                                    "tool `{}` returned invalid argument JSON: {}",
                                    b.name, e
                                ))
                            })?
                        };
                        let tool_use = ToolUseBlock::new(b.id, b.name, input);
                        self.completed.push(ContentBlock::ToolUse(tool_use.clone()));
                        Ok(vec![StreamEvent::ToolUseCompleted(tool_use)])
                    }
                }
            }
            ProviderStreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                self.usage = usage;
                Ok(Vec::new())
            }
            ProviderStreamEvent::MessageStop => Ok(vec![StreamEvent::MessageComplete {
                stop_reason: self.stop_reason.clone(),
                usage: self.usage,
            }]),
            ProviderStreamEvent::Ping => Ok(Vec::new()),
            ProviderStreamEvent::Error { error } => Err(Error::transport(error.message)),
        }
    }

    /// Consume the aggregator, returning the assembled content blocks for the
    /// assistant turn just streamed. Call once `message_stop` has been seen.
    pub fn finish(self) -> Vec<ContentBlock> {
        self.completed
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }
}

/// Parses a raw HTTP streaming response body into a stream of
/// [`ProviderStreamEvent`]s.
///
/// Mirrors the original SDK's SSE loop: split on lines, take everything
/// after `data: `, skip `[DONE]`, deserialize the rest as JSON. Errors are
/// per-event, not fatal to the stream, except JSON parse failures, which
/// surface as [`Error::Transport`] since a malformed event usually means the
/// connection degraded mid-stream.
pub(crate) fn parse_provider_stream(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<ProviderStreamEvent>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result.map_err(Error::Http) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };

        let text = String::from_utf8_lossy(&bytes);

        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" || data.is_empty() {
                    continue;
                }

                let event: ProviderStreamEvent = match serde_json::from_str(data) {
                    Ok(e) => e,
                    Err(e) => {
                        return Some(Err(Error::transport(format!(
                            "failed to parse stream event: {}",
                            e
                        ))));
                    }
                };

                return Some(Ok(event));
            }
        }

        None
    });

    Box::pin(stream)
}
