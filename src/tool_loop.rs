//! Tool Loop (C5, §4.5): multi-round agentic executor built on the Streaming
//! Runner and Tool Registry.
//!
//! Conversation state is the ordered `Vec<Message>` segment list from §9
//! (`UserText | AssistantText | AssistantThinking | ToolRequest | ToolResult`,
//! represented here directly as [`ContentBlock`] variants inside [`Message`]s)
//! — the Streaming Runner knows how to serialize this to wire format; this
//! module only appends and re-submits. `PreToolUse`/`PostToolUse` hooks fire
//! around each dispatch, and the loop is round-counted and event-emitting
//! rather than running until tool calls simply stop.

use crate::event_bus::{Event, EventBus, WorkflowKind};
use crate::hooks::{Hooks, PostToolUseEvent, PreToolUseEvent};
use crate::streaming_runner::{RunOutcome, StreamingRunner};
use crate::tools::Tool;
use crate::types::{CallOptions, ContentBlock, Message, ToolResultBlock};
use crate::{Error, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Upper bound on agentic rounds (§3 invariant 4, §4.5, §8 property 2).
pub const MAX_ROUNDS: u32 = 8;

#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    pub max_rounds: u32,
    /// Whether exceeding `max_rounds` with tools still outstanding forces one
    /// final no-tools continuation asking the model to summarize (§4.5 edge
    /// case, §9 Open Question 2 — resolved: always force it).
    pub force_terminal_summary: bool,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: MAX_ROUNDS,
            force_terminal_summary: true,
        }
    }
}

/// Outcome of a completed (or round-limited) Tool Loop run.
pub struct ToolLoopOutcome {
    pub messages: Vec<Message>,
    pub final_text: String,
    pub rounds: u32,
}

pub struct ToolLoop {
    runner: Arc<StreamingRunner>,
    event_bus: Arc<EventBus>,
    tools: Vec<Arc<Tool>>,
    hooks: Hooks,
    config: ToolLoopConfig,
}

impl ToolLoop {
    pub fn new(
        runner: Arc<StreamingRunner>,
        event_bus: Arc<EventBus>,
        tools: Vec<Arc<Tool>>,
        hooks: Hooks,
        config: ToolLoopConfig,
    ) -> Self {
        Self { runner, event_bus, tools, hooks, config }
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Runs the loop to completion: (a) the model returns a response without
    /// further tool requests, or (b) `max_rounds` is exhausted — at which
    /// point, if configured, a final no-tools continuation is forced so the
    /// model summarizes with what it has (§4.5 edge case 3).
    pub async fn run(
        &self,
        options: &CallOptions,
        system_prompt: &str,
        initial_user_prompt: &str,
        namespace: WorkflowKind,
        client: &str,
        cancel: &AtomicBool,
    ) -> Result<ToolLoopOutcome> {
        let ns = crate::event_bus::namespace_for(namespace);
        let mut messages = vec![Message::user(initial_user_prompt)];
        let mut rounds = 0;
        let mut call_options = options.clone();

        loop {
            if cancel.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }

            let forcing_terminal = rounds >= self.config.max_rounds;
            if forcing_terminal && !self.config.force_terminal_summary {
                break;
            }

            let tools_for_call = if forcing_terminal { Vec::new() } else { self.tools.clone() };
            call_options = CallOptions::builder()
                .system_prompt(if forcing_terminal {
                    format!(
                        "{system_prompt}\n\nYou have reached the maximum number of tool-use rounds. \
                         Summarize your findings now using only the information already gathered; \
                         do not request further tools."
                    )
                } else {
                    system_prompt.to_string()
                })
                .model(options.model())
                .base_url(options.base_url())
                .api_key(options.api_key())
                .thinking_budget(options.thinking_budget())
                .max_output_tokens(options.max_output_tokens())
                .temperature(options.temperature())
                .timeout(options.timeout())
                .tools(tools_for_call)
                .build()?;

            let outcome: RunOutcome = self
                .runner
                .run(&call_options, &messages, namespace, client, cancel)
                .await?;

            let tool_requests: Vec<_> = outcome
                .blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse(tu) => Some(tu.clone()),
                    _ => None,
                })
                .collect();

            messages.push(Message::assistant(outcome.blocks.clone()));

            if tool_requests.is_empty() || forcing_terminal {
                let final_text = outcome
                    .blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text(t) => Some(t.text.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                return Ok(ToolLoopOutcome { messages, final_text, rounds });
            }

            // Ordering guarantee (§4.5): calls are strictly sequential within
            // one round — a new dispatch waits for the previous tool_result.
            for request in tool_requests {
                self.event_bus.emit(
                    client,
                    Event::ToolCall {
                        namespace: ns,
                        tool_id: request.id.clone(),
                        tool_name: request.name.clone(),
                        tool_input: request.input.clone(),
                        status: "calling",
                    },
                );
                self.event_bus.emit(
                    client,
                    Event::ToolCall {
                        namespace: ns,
                        tool_id: request.id.clone(),
                        tool_name: request.name.clone(),
                        tool_input: request.input.clone(),
                        status: "executing",
                    },
                );

                let pre_event = PreToolUseEvent::new(
                    request.name.clone(),
                    request.input.clone(),
                    request.id.clone(),
                    Vec::new(),
                );
                let mut input = request.input.clone();
                let mut blocked_reason = None;
                if let Some(decision) = self.hooks.execute_pre_tool_use(pre_event).await {
                    if !decision.continue_execution {
                        blocked_reason = decision.reason;
                    } else if let Some(modified) = decision.modified_input {
                        input = modified;
                    }
                }

                let result_value = if let Some(reason) = &blocked_reason {
                    serde_json::json!({"error": "blocked_by_hook", "message": reason})
                } else {
                    match self.find_tool(&request.name) {
                        None => serde_json::json!({"error": "unknown_tool"}),
                        Some(tool) => match tool.execute(input.clone()).await {
                            Ok(v) => v,
                            Err(e) => serde_json::json!({"error": "tool_error", "message": e.to_string()}),
                        },
                    }
                };

                let post_event = PostToolUseEvent::new(
                    request.name.clone(),
                    input,
                    request.id.clone(),
                    result_value.clone(),
                    Vec::new(),
                );
                let mut final_result = result_value;
                if let Some(decision) = self.hooks.execute_post_tool_use(post_event).await {
                    if let Some(modified) = decision.modified_input {
                        final_result = modified;
                    }
                }

                let preview = preview_of(&final_result);
                self.event_bus.emit(
                    client,
                    Event::ToolResult {
                        namespace: ns,
                        tool_id: request.id.clone(),
                        tool_name: request.name.clone(),
                        result_preview: preview.0,
                        result_length: preview.1,
                    },
                );

                messages.push(Message::tool_result(ToolResultBlock::new(&request.id, final_result)));
            }

            rounds += 1;
        }
    }
}

/// Truncates a tool result to a ≤256-char preview plus its full length
/// (§4.5 step 3).
fn preview_of(value: &serde_json::Value) -> (String, usize) {
    let rendered = value.to_string();
    let length = rendered.len();
    let preview = if length > 256 {
        rendered.char_indices().nth(256).map(|(i, _)| rendered[..i].to_string()).unwrap_or(rendered)
    } else {
        rendered
    };
    (preview, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_of_truncates_to_256_chars() {
        let value = serde_json::json!({"data": "x".repeat(1000)});
        let (preview, length) = preview_of(&value);
        assert!(preview.len() <= 256);
        assert!(length > 256);
    }

    #[test]
    fn default_config_matches_spec_round_bound() {
        let config = ToolLoopConfig::default();
        assert_eq!(config.max_rounds, 8);
        assert!(config.force_terminal_summary);
    }
}
