use crate::config::ApiConfig;
use crate::protocol::{ChatRequest, ConversationTurn};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata about a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// Ordered, append-only history of one chat session.
///
/// Owned by the caller and lent to each request; turns are never edited or
/// removed once pushed.
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    pub metadata: ConversationMetadata,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            turns: Vec::new(),
            metadata: ConversationMetadata {
                id: Uuid::new_v4().to_string(),
                title: "New Conversation".to_string(),
                created_at: now,
                updated_at: now,
                turn_count: 0,
            },
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.metadata.turn_count = self.turns.len();
        self.metadata.updated_at = Utc::now();
    }

    /// Record a completed exchange. `question` is what the user typed and
    /// names the conversation on its first exchange; `user` is the turn as
    /// sent. The assistant text must already have its stripped blocks removed.
    pub fn push_exchange(
        &mut self,
        question: &str,
        user: ConversationTurn,
        assistant_text: impl Into<String>,
    ) {
        if self.turns.is_empty() {
            self.metadata.title = generate_title(question);
        }
        self.push(user);
        self.push(ConversationTurn::assistant(assistant_text));
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Build the request for the next turn: the full history followed by the
    /// pending user submission.
    pub fn build_request(&self, config: &ApiConfig, pending: &ConversationTurn) -> ChatRequest {
        let mut messages = self.turns.clone();
        messages.push(pending.clone());

        ChatRequest {
            model_id: config.model_id.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            messages,
            stream: config.stream,
        }
    }
}

/// Generate a title from the first user message
pub fn generate_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    let first_line = trimmed.lines().next().unwrap_or("");

    // Take first 50 characters, truncate at word boundary
    if first_line.chars().count() <= 50 {
        return first_line.to_string();
    }

    let truncated: String = first_line.chars().take(50).collect();
    if let Some(last_space) = truncated.rfind(' ') {
        format!("{}...", &truncated[..last_space])
    } else {
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChatRole;

    #[test]
    fn test_generate_title_short() {
        assert_eq!(generate_title("How do I read a CSV?"), "How do I read a CSV?");
    }

    #[test]
    fn test_generate_title_long() {
        let long =
            "How do I fit a mixed effects model with random slopes for each subject in lme4";
        let title = generate_title(long);
        assert!(title.chars().count() <= 53); // 50 + "..."
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_generate_title_uses_first_line() {
        assert_eq!(generate_title("Plot this\nx <- 1:10"), "Plot this");
    }

    #[test]
    fn test_generate_title_multibyte() {
        let long = "é".repeat(80);
        let title = generate_title(&long);
        assert_eq!(title.chars().count(), 53);
    }

    #[test]
    fn test_push_updates_metadata() {
        let mut history = ConversationHistory::new();
        history.push_exchange(
            "What is a tibble?",
            ConversationTurn::user("You are an expert...\nWhat is a tibble?"),
            "A data frame.",
        );

        assert_eq!(history.len(), 2);
        assert_eq!(history.metadata.turn_count, 2);
        assert_eq!(history.metadata.title, "What is a tibble?");
        assert_eq!(history.last().unwrap().role(), ChatRole::Assistant);
    }

    #[test]
    fn test_title_set_only_by_first_exchange() {
        let mut history = ConversationHistory::new();
        history.push_exchange("first question", ConversationTurn::user("first question"), "a");
        history.push_exchange("second question", ConversationTurn::user("second question"), "b");

        assert_eq!(history.metadata.title, "first question");
        assert_eq!(history.turns()[2].content(), "second question");
    }

    #[test]
    fn test_build_request_appends_pending_turn() {
        let mut history = ConversationHistory::new();
        history.push_exchange("first", ConversationTurn::user("first"), "answer");

        let config = ApiConfig::default();
        let pending = ConversationTurn::user("second");
        let request = history.build_request(&config, &pending);

        let roles: Vec<ChatRole> = request.messages.iter().map(|t| t.role()).collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(request.messages[2].content(), "second");
        assert_eq!(request.model_id, config.model_id);
        assert_eq!(request.max_tokens, config.max_tokens);
        // Building a request never touches the history itself
        assert_eq!(history.len(), 2);
    }
}
