//! Streaming chat client for the Anthropic Messages API. The agent loop
//! only sees the `ChatClient` abstraction; everything vendor-specific is
//! contained here.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::io::StreamReader;

use super::chat::{ChatClient, ChatStream, ContentBlock, Message, StreamEvent, ToolDefinition};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY is not set")?;
        Self::new(api_key)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl ChatClient for AnthropicClient {
    async fn create_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ChatStream> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("send chat request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat request failed: {status}: {body}");
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let mut reader = tokio::io::BufReader::new(StreamReader::new(bytes));

        let stream = async_stream::stream! {
            // Per-block accumulation: tool_use inputs arrive as partial JSON
            // deltas and only become a block at content_block_stop.
            let mut current: Option<(ContentBlock, String)> = None;

            loop {
                let event = match read_sse_data(&mut reader).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(anyhow::Error::new(err).context("read chat stream"));
                        break;
                    }
                };
                let Ok(event) = serde_json::from_str::<Value>(&event) else {
                    continue;
                };

                match event.get("type").and_then(|v| v.as_str()) {
                    Some("content_block_start") => {
                        let block = &event["content_block"];
                        match block.get("type").and_then(|v| v.as_str()) {
                            Some("text") => {
                                current = Some((
                                    ContentBlock::Text {
                                        text: String::new(),
                                    },
                                    String::new(),
                                ));
                            }
                            Some("tool_use") => {
                                let id = block["id"].as_str().unwrap_or_default().to_string();
                                let name = block["name"].as_str().unwrap_or_default().to_string();
                                current = Some((
                                    ContentBlock::ToolUse {
                                        id,
                                        name,
                                        input: Value::Null,
                                    },
                                    String::new(),
                                ));
                            }
                            _ => current = None,
                        }
                    }
                    Some("content_block_delta") => {
                        let delta = &event["delta"];
                        match delta.get("type").and_then(|v| v.as_str()) {
                            Some("text_delta") => {
                                let chunk = delta["text"].as_str().unwrap_or_default();
                                yield Ok(StreamEvent::TextDelta(chunk.to_string()));
                                if let Some((ContentBlock::Text { text }, _)) = &mut current {
                                    text.push_str(chunk);
                                }
                            }
                            Some("input_json_delta") => {
                                if let Some((_, partial)) = &mut current {
                                    partial.push_str(
                                        delta["partial_json"].as_str().unwrap_or_default(),
                                    );
                                }
                            }
                            _ => {}
                        }
                    }
                    Some("content_block_stop") => {
                        if let Some((mut block, partial)) = current.take() {
                            if let ContentBlock::ToolUse { input, .. } = &mut block {
                                *input = serde_json::from_str(&partial)
                                    .unwrap_or_else(|_| serde_json::json!({}));
                            }
                            yield Ok(StreamEvent::ContentBlock(block));
                        }
                    }
                    Some("message_stop") => break,
                    Some("error") => {
                        let message = event["error"]["message"]
                            .as_str()
                            .unwrap_or("stream error")
                            .to_string();
                        yield Err(anyhow::anyhow!("chat stream error: {message}"));
                        break;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Reads the next SSE `data:` payload, joining multi-line data fields.
async fn read_sse_data<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, std::io::Error> {
    use tokio::io::AsyncBufReadExt;

    let mut data = String::new();
    let mut saw_data = false;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(if saw_data { Some(data) } else { None });
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if trimmed.is_empty() {
            if saw_data {
                return Ok(Some(data));
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if saw_data {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            saw_data = true;
        }
    }
}
