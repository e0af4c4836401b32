//! The agentic tool-calling loop: send, stream, execute tool calls, feed the
//! results back, repeat until the model answers with text alone.

mod anthropic;
mod chat;

pub use anthropic::AnthropicClient;
pub use chat::{
    ChatClient, ChatStream, ContentBlock, Message, MessageContent, Role, StreamEvent,
    ToolDefinition,
};

use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::fleet::Fleet;

pub const DEFAULT_MAX_TURNS: usize = 20;
const MAX_TURNS_NOTICE: &str = "\n[Reached maximum turns]\n";

/// Observer callbacks for rendering the loop's progress. All methods default
/// to no-ops.
pub trait AgentObserver {
    fn on_turn_start(&mut self, _turn: usize) {}
    fn on_turn_end(&mut self) {}
    fn on_text_delta(&mut self, _delta: &str) {}
    fn on_tool_call_start(&mut self, _id: &str, _name: &str, _server: &str, _input: &Value) {}
    fn on_tool_call_end(&mut self, _id: &str, _result: &str, _is_error: bool) {}
}

pub struct NullObserver;

impl AgentObserver for NullObserver {}

/// Runs one user prompt through the loop, mutating `messages` in place.
///
/// Tool calls inside one assistant turn run serially in the order the model
/// emitted them, so a dependent call in the same turn observes its
/// predecessor's effects.
pub async fn run_agent_loop(
    client: &dyn ChatClient,
    fleet: &mut Fleet,
    messages: &mut Vec<Message>,
    prompt: impl Into<String>,
    max_turns: usize,
    observer: &mut dyn AgentObserver,
) -> anyhow::Result<()> {
    messages.push(Message::user_text(prompt));

    for turn in 0..max_turns {
        observer.on_turn_start(turn);

        let tools: Vec<ToolDefinition> = fleet
            .all_tools()
            .iter()
            .map(ToolDefinition::from_catalog)
            .collect();

        let mut stream = client.create_stream(messages, &tools).await?;
        let mut blocks: Vec<ContentBlock> = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => observer.on_text_delta(&delta),
                StreamEvent::ContentBlock(block) => blocks.push(block),
            }
        }

        messages.push(Message::assistant_blocks(blocks.clone()));

        let tool_uses: Vec<(String, String, Value)> = blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
                _ => None,
            })
            .collect();

        if tool_uses.is_empty() {
            observer.on_turn_end();
            return Ok(());
        }

        let mut results: Vec<ContentBlock> = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in tool_uses {
            let server = fleet.owning_server(&name).unwrap_or_default();
            observer.on_tool_call_start(&id, &name, &server, &input);

            let (content, is_error) = match fleet.call_tool(&name, input).await {
                Ok(result) => (result.text_content(), result.is_error()),
                Err(err) => (format!("Tool error: {err}"), true),
            };
            debug!("tool {name}: is_error={is_error}");
            observer.on_tool_call_end(&id, &content, is_error);

            results.push(ContentBlock::ToolResult {
                tool_use_id: id,
                content,
                is_error,
            });
        }
        messages.push(Message::user_blocks(results));
        observer.on_turn_end();
    }

    observer.on_text_delta(MAX_TURNS_NOTICE);
    Ok(())
}
