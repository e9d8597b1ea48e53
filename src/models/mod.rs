pub mod anthropic;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::ChatError;
use crate::protocol::{ChatEvent, ChatRequest};

/// A hosted model that can answer a [`ChatRequest`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Blocking call; returns the complete response text
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError>;

    /// Streaming call; deltas arrive in order, ending with `Done` or `Error`
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, ChatError>;

    /// Used for logging
    fn provider_name(&self) -> &'static str;
}

/// Receiving end of a streaming response.
///
/// Dropping it aborts the task feeding the channel.
pub struct DeltaStream {
    rx: mpsc::UnboundedReceiver<ChatEvent>,
    abort_handle: Option<AbortHandle>,
}

impl DeltaStream {
    pub fn new(rx: mpsc::UnboundedReceiver<ChatEvent>, abort_handle: Option<AbortHandle>) -> Self {
        Self { rx, abort_handle }
    }

    /// Next event, or `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.rx.recv().await
    }

    /// Stop the producer without waiting for it to finish
    pub fn abort(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        self.rx.close();
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
    }
}
