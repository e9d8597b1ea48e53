use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{DeltaStream, ModelClient};
use crate::config::ApiConfig;
use crate::error::ChatError;
use crate::protocol::{ChatEvent, ChatRequest};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest gap allowed between two stream events
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
pub struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize, Clone)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// Body of a non-streaming `/v1/messages` response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicResponse {
    /// Concatenation of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text.as_str()),
                AnthropicResponseBlock::Other => None,
            })
            .collect()
    }
}

pub fn convert_to_anthropic(request: &ChatRequest, stream: bool) -> AnthropicRequest {
    let messages = request
        .messages
        .iter()
        .map(|turn| AnthropicMessage {
            role: turn.role().as_str().to_string(),
            content: turn.content().to_string(),
        })
        .collect();

    AnthropicRequest {
        model: request.model_id.clone(),
        system: None,
        messages,
        stream,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// What a single SSE event means for the turn
#[derive(Debug, PartialEq)]
enum Translated {
    Event(ChatEvent),
    Skip,
}

/// Map one SSE event (its `event:` name and `data:` payload) onto a
/// [`ChatEvent`].
///
/// Only text deltas carry output; thinking and tool deltas are ignored.
fn translate_event(event_type: &str, data: &str) -> Translated {
    let parsed: AnthropicStreamEvent = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("unparseable stream event {}: {}", event_type, e);
            return Translated::Skip;
        }
    };

    match parsed.event_type.as_str() {
        "content_block_delta" => {
            let delta = &parsed.data["delta"];
            if delta["type"] == "text_delta" {
                if let Some(text) = delta["text"].as_str() {
                    return Translated::Event(ChatEvent::Delta(text.to_string()));
                }
            }
            Translated::Skip
        }
        "message_stop" => Translated::Event(ChatEvent::Done),
        "error" => {
            let error = &parsed.data["error"];
            let kind = error["type"].as_str().unwrap_or("error");
            let message = error["message"].as_str().unwrap_or("unknown stream error");
            Translated::Event(ChatEvent::Error(format!("{}: {}", kind, message)))
        }
        other => {
            trace!("ignoring stream event {}", other);
            Translated::Skip
        }
    }
}

pub struct AnthropicClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    idle_timeout: Duration,
}

impl AnthropicClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ChatError> {
        if config.api_key.trim().is_empty() {
            return Err(ChatError::Configuration("API key is empty".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response, ChatError> {
        let response = self
            .http_client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::transport(format!(
                "Anthropic API error {}: {}",
                status, text
            )));
        }

        Ok(response)
    }

    /// Read the SSE body and forward translated events until a terminal one
    async fn pump_sse(
        response: reqwest::Response,
        idle_timeout: Duration,
        tx: mpsc::UnboundedSender<ChatEvent>,
    ) {
        let mut stream = response.bytes_stream().eventsource();

        loop {
            let sse = match timeout(idle_timeout, stream.next()).await {
                Ok(Some(Ok(sse))) => sse,
                Ok(Some(Err(e))) => {
                    let _ = tx.send(ChatEvent::Error(format!("stream read failed: {}", e)));
                    return;
                }
                Ok(None) => {
                    debug!("stream closed without message_stop");
                    let _ = tx.send(ChatEvent::Error(
                        "stream closed before response completed".to_string(),
                    ));
                    return;
                }
                Err(_) => {
                    debug!(?idle_timeout, "stream went idle");
                    let _ = tx.send(ChatEvent::Error(format!(
                        "no stream event within {}s",
                        idle_timeout.as_secs_f64()
                    )));
                    return;
                }
            };

            if Self::forward(&sse.event, &sse.data, &tx) {
                return;
            }
        }
    }

    /// Returns true once a terminal event has been sent or the receiver is gone
    fn forward(event_type: &str, data: &str, tx: &mpsc::UnboundedSender<ChatEvent>) -> bool {
        match translate_event(event_type, data) {
            Translated::Event(chat_event) => {
                let terminal = !matches!(chat_event, ChatEvent::Delta(_));
                tx.send(chat_event).is_err() || terminal
            }
            Translated::Skip => false,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let body = convert_to_anthropic(request, false);
        debug!(model = %body.model, messages = body.messages.len(), "sending blocking request");

        let response = self.send(&body).await?;
        let parsed: AnthropicResponse = response.json().await?;
        if let Some(reason) = &parsed.stop_reason {
            debug!("stop reason: {}", reason);
        }
        Ok(parsed.text())
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, ChatError> {
        let body = convert_to_anthropic(request, true);
        debug!(model = %body.model, messages = body.messages.len(), "sending streaming request");

        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::pump_sse(response, self.idle_timeout, tx));
        Ok(DeltaStream::new(rx, Some(task.abort_handle())))
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}
