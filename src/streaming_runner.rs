//! Streaming Runner (C4, §4.4): drives a single LLM call over the
//! Messages-style wire format in [`crate::types`], forwarding thinking and
//! response deltas to the Event Bus and recording authoritative token usage.
//!
//! The line-splitting in [`crate::utils::parse_provider_stream`] and the
//! index-keyed delta aggregator in [`crate::utils::ContentBlockAggregator`]
//! emit events incrementally as the stream arrives rather than only at
//! stream end.

use crate::event_bus::{Event, EventBus, WorkflowKind};
use crate::token_accountant::TokenAccountant;
use crate::tools::Tool;
use crate::types::{
    CallOptions, ContentBlock, Message, MessageRole, ProviderContentPart, ProviderImageSource,
    ProviderMessage, ProviderRequest, ProviderToolSpec, ThinkingConfig, Usage,
};
use crate::utils::{parse_provider_stream, ContentBlockAggregator, StreamEvent};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Authoritative result of one streamed call: the full set of content blocks
/// the model produced (text, thinking, and any tool requests) plus usage.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub blocks: Vec<ContentBlock>,
    pub usage: Usage,
    pub stop_reason: Option<String>,
    pub truncated: bool,
}

pub struct StreamingRunner {
    http: reqwest::Client,
    event_bus: Arc<EventBus>,
    token_accountant: Arc<TokenAccountant>,
}

impl StreamingRunner {
    pub fn new(event_bus: Arc<EventBus>, token_accountant: Arc<TokenAccountant>) -> Self {
        Self {
            http: reqwest::Client::new(),
            event_bus,
            token_accountant,
        }
    }

    /// Drives one call. `messages` is the full conversation (system messages
    /// are carried separately via `options.system_prompt()`); `namespace`
    /// picks the Event Bus prefix (§4.8); `client` is the recipient of the
    /// incremental events. `cancel` is checked between stream chunks so a
    /// disconnecting client aborts the call without emitting further events
    /// (§4.4 failure mode "Cancellation").
    pub async fn run(
        &self,
        options: &CallOptions,
        messages: &[Message],
        namespace: WorkflowKind,
        client: &str,
        cancel: &AtomicBool,
    ) -> Result<RunOutcome> {
        let ns = crate::event_bus::namespace_for(namespace);
        let request = build_request(options, messages);

        let url = format!("{}/messages", options.base_url());
        let response = self
            .http
            .post(&url)
            .header("x-api-key", options.api_key())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(Duration::from_secs(options.timeout()))
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.event_bus.emit(
                    client,
                    Event::Error { namespace: ns, message: e.to_string() },
                );
                return Err(Error::Http(e));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = format!("provider returned {status}: {body}");
            self.event_bus
                .emit(client, Event::Error { namespace: ns, message: message.clone() });
            return Err(Error::transport(message));
        }

        let mut stream = parse_provider_stream(response);
        let mut aggregator = ContentBlockAggregator::new();

        let mut thinking_started = false;
        let mut thinking_done = false;
        let mut response_started = false;
        let mut response_text = String::new();
        let mut stop_reason = None;
        let mut usage = Usage::default();

        while let Some(event) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }

            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    self.event_bus
                        .emit(client, Event::Error { namespace: ns, message: e.to_string() });
                    return Err(e);
                }
            };

            let stream_events = match aggregator.process_event(event) {
                Ok(evs) => evs,
                Err(e) => {
                    self.event_bus
                        .emit(client, Event::Error { namespace: ns, message: e.to_string() });
                    return Err(e);
                }
            };

            for stream_event in stream_events {
                match stream_event {
                    StreamEvent::ThinkingDelta(text) => {
                        if !thinking_started {
                            self.event_bus.emit(client, Event::ThinkingStarted { namespace: ns });
                            thinking_started = true;
                        }
                        self.event_bus
                            .emit(client, Event::ThinkingDelta { namespace: ns, text });
                    }
                    StreamEvent::TextDelta(text) => {
                        if thinking_started && !thinking_done {
                            self.event_bus.emit(client, Event::ThinkingComplete { namespace: ns });
                            thinking_done = true;
                        }
                        if !response_started {
                            self.event_bus.emit(client, Event::ResponseStarted { namespace: ns });
                            response_started = true;
                        }
                        response_text.push_str(&text);
                        self.event_bus
                            .emit(client, Event::ResponseDelta { namespace: ns, text });
                    }
                    StreamEvent::ToolUseStarted { .. } => {
                        if thinking_started && !thinking_done {
                            self.event_bus.emit(client, Event::ThinkingComplete { namespace: ns });
                            thinking_done = true;
                        }
                    }
                    StreamEvent::ToolUseCompleted(_) => {}
                    StreamEvent::MessageComplete { stop_reason: sr, usage: u } => {
                        stop_reason = sr;
                        usage = u;
                    }
                }
            }
        }

        let truncated = stop_reason.as_deref() == Some("max_tokens");
        if response_started {
            self.event_bus.emit(
                client,
                Event::ResponseComplete {
                    namespace: ns,
                    full_text: response_text,
                    truncated,
                },
            );
        }

        let tally = self
            .token_accountant
            .add(usage.input_tokens, usage.output_tokens, usage.thinking_tokens);
        self.event_bus.broadcast(Event::TokenUpdate { tally });

        Ok(RunOutcome {
            blocks: aggregator.finish(),
            usage,
            stop_reason,
            truncated,
        })
    }
}

fn image_source(block: &crate::types::ImageBlock) -> ProviderImageSource {
    let kind = if block.url().starts_with("data:") { "base64" } else { "url" };
    ProviderImageSource { kind, url: block.url().to_string() }
}

fn to_provider_content(blocks: &[ContentBlock]) -> Vec<ProviderContentPart> {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text(t) => ProviderContentPart::Text { text: t.text.clone() },
            ContentBlock::Thinking(t) => ProviderContentPart::Thinking { thinking: t.thinking.clone() },
            ContentBlock::Image(img) => ProviderContentPart::Image { source: image_source(img) },
            ContentBlock::ToolUse(tu) => ProviderContentPart::ToolUse {
                id: tu.id.clone(),
                name: tu.name.clone(),
                input: tu.input.clone(),
            },
            ContentBlock::ToolResult(tr) => ProviderContentPart::ToolResult {
                tool_use_id: tr.tool_use_id.clone(),
                content: tr.content.clone(),
                is_error: tr.is_error,
            },
        })
        .collect()
}

/// Converts the conversation into the wire format. System-role messages are
/// dropped here since the system prompt travels on `ProviderRequest::system`
/// instead; Tool-role messages fold into a `user` message carrying
/// `tool_result` blocks (see [`MessageRole::Tool`] doc comment).
fn build_request(options: &CallOptions, messages: &[Message]) -> ProviderRequest {
    let provider_messages = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| ProviderMessage {
            role: match m.role {
                MessageRole::Assistant => "assistant",
                _ => "user",
            },
            content: to_provider_content(&m.content),
        })
        .collect();

    let tools: Vec<ProviderToolSpec> = options
        .tools()
        .iter()
        .map(|t: &Arc<Tool>| ProviderToolSpec {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema().clone(),
        })
        .collect();

    let thinking = if options.thinking_budget() > 0 {
        Some(ThinkingConfig { kind: "enabled", budget_tokens: options.thinking_budget() })
    } else {
        None
    };

    ProviderRequest {
        model: options.model().to_string(),
        system: options.system_prompt().to_string(),
        messages: provider_messages,
        max_tokens: options.max_output_tokens(),
        temperature: options.temperature(),
        stream: true,
        thinking,
        tools,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextBlock;

    #[test]
    fn build_request_drops_system_messages_and_sets_system_field() {
        let options = CallOptions::builder()
            .model("claude-long-context")
            .base_url("https://api.anthropic.com/v1")
            .system_prompt("You are a legal analyst")
            .thinking_budget(1000)
            .build()
            .unwrap();

        let messages = vec![Message::system("ignored"), Message::user("hello")];
        let request = build_request(&options, &messages);

        assert_eq!(request.system, "You are a legal analyst");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert!(request.thinking.is_some());
    }

    #[test]
    fn build_request_folds_tool_role_into_user() {
        let options = CallOptions::builder()
            .model("m")
            .base_url("https://api.anthropic.com/v1")
            .build()
            .unwrap();

        let messages = vec![Message::tool_result(crate::types::ToolResultBlock::new(
            "tu_1",
            serde_json::json!({"ok": true}),
        ))];
        let request = build_request(&options, &messages);

        assert_eq!(request.messages[0].role, "user");
        assert!(matches!(
            request.messages[0].content[0],
            ProviderContentPart::ToolResult { .. }
        ));
    }

    #[test]
    fn build_request_without_thinking_budget_omits_thinking_config() {
        let options = CallOptions::builder()
            .model("m")
            .base_url("https://api.anthropic.com/v1")
            .build()
            .unwrap();
        let request = build_request(&options, &[Message::user("hi")]);
        assert!(request.thinking.is_none());
    }

    #[test]
    fn to_provider_content_maps_every_block_variant() {
        let blocks = vec![
            ContentBlock::Text(TextBlock::new("hi")),
            ContentBlock::Thinking(crate::types::ThinkingBlock::new("because")),
        ];
        let parts = to_provider_content(&blocks);
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0], ProviderContentPart::Text { .. }));
        assert!(matches!(parts[1], ProviderContentPart::Thinking { .. }));
    }
}
