use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::accumulator::{RenderHook, StreamAccumulator, TurnOutput, TurnState};
use crate::config::ApiConfig;
use crate::conversation::ConversationHistory;
use crate::error::ChatError;
use crate::models::{DeltaStream, ModelClient};
use crate::prompt::PromptTemplate;
use crate::protocol::{ChatEvent, ChatRequest, ConversationTurn};
use crate::tag_filter::TagFilter;

/// Outcome of waiting on the next stream event
enum Step {
    Cancelled,
    Event(Option<ChatEvent>),
}

/// Runs chat turns against one conversation.
///
/// Turns are serialized by `&mut self`. The history only changes when a turn
/// finishes; cancelled and failed turns leave it untouched.
pub struct ChatManager {
    config: ApiConfig,
    conversation: ConversationHistory,
    accumulator: StreamAccumulator,
    template: PromptTemplate,
}

impl ChatManager {
    pub fn new(config: ApiConfig) -> Self {
        Self::with_filter(config, TagFilter::default())
    }

    pub fn with_filter(config: ApiConfig, filter: TagFilter) -> Self {
        Self {
            config,
            conversation: ConversationHistory::new(),
            accumulator: StreamAccumulator::new(filter),
            template: PromptTemplate::default(),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn conversation(&self) -> &ConversationHistory {
        &self.conversation
    }

    pub fn turn_state(&self) -> TurnState {
        self.accumulator.state()
    }

    /// Drop the current conversation and start an empty one
    pub fn new_conversation(&mut self) {
        debug!(id = %self.conversation.metadata.id, "starting new conversation");
        self.conversation = ConversationHistory::new();
    }

    /// Run one turn for `input`.
    ///
    /// `hook` sees the segment view after every delta and once more with the
    /// final view. Cancelling `cancel` abandons the turn and aborts the
    /// transport.
    pub async fn submit(
        &mut self,
        client: &dyn ModelClient,
        input: &str,
        hook: &mut dyn RenderHook,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, ChatError> {
        self.config.validate()?;

        let is_first_turn = self.conversation.is_empty();
        let user = ConversationTurn::user(self.template.user_message(input, is_first_turn));
        let request = self.conversation.build_request(&self.config, &user);

        debug!(
            provider = client.provider_name(),
            model = %request.model_id,
            messages = request.messages.len(),
            stream = request.stream,
            "submitting turn"
        );

        self.accumulator.start();
        let output = if request.stream {
            self.run_streaming(client, &request, hook, cancel).await?
        } else {
            self.run_blocking(client, &request, hook, cancel).await?
        };

        hook.render(&output.segments);
        self.conversation.push_exchange(input, user, output.text.clone());
        Ok(output)
    }

    async fn run_streaming(
        &mut self,
        client: &dyn ModelClient,
        request: &ChatRequest,
        hook: &mut dyn RenderHook,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, ChatError> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = client.stream(request) => Some(opened),
        };
        let mut stream: DeltaStream = match opened {
            None => return Err(self.cancelled()),
            Some(Ok(stream)) => stream,
            Some(Err(e)) => return Err(self.abandon(e)),
        };

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                event = stream.recv() => Step::Event(event),
            };

            match step {
                Step::Cancelled => {
                    stream.abort();
                    return Err(self.cancelled());
                }
                Step::Event(Some(ChatEvent::Delta(text))) => {
                    self.accumulator.on_delta(&text, hook);
                }
                Step::Event(Some(ChatEvent::Done)) => break,
                Step::Event(Some(ChatEvent::Error(message))) => {
                    return Err(self.accumulator.fail(message));
                }
                Step::Event(None) => {
                    return Err(self
                        .accumulator
                        .fail("stream closed before response completed"));
                }
            }
        }

        self.finish()
    }

    async fn run_blocking(
        &mut self,
        client: &dyn ModelClient,
        request: &ChatRequest,
        hook: &mut dyn RenderHook,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, ChatError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = client.complete(request) => Some(response),
        };

        match response {
            None => Err(self.cancelled()),
            Some(Ok(text)) => {
                self.accumulator.on_delta(&text, hook);
                self.finish()
            }
            Some(Err(e)) => Err(self.abandon(e)),
        }
    }

    fn finish(&mut self) -> Result<TurnOutput, ChatError> {
        self.accumulator
            .finish()
            .ok_or_else(|| ChatError::transport("turn ended while not streaming"))
    }

    fn cancelled(&mut self) -> ChatError {
        self.accumulator.cancel();
        ChatError::Cancelled
    }

    /// Close the turn after the client itself returned an error
    fn abandon(&mut self, err: ChatError) -> ChatError {
        match err {
            ChatError::Transport { message, .. } => self.accumulator.fail(message),
            other => {
                self.accumulator.cancel();
                other
            }
        }
    }
}
