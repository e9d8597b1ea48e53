pub mod accumulator;
pub mod chat_manager;
pub mod config;
pub mod conversation;
pub mod error;
pub mod export;
pub mod models;
pub mod prompt;
pub mod protocol;
pub mod render;
pub mod tag_filter;

pub use accumulator::{NoRender, RenderHook, StreamAccumulator, TurnOutput, TurnState};
pub use chat_manager::ChatManager;
pub use config::ApiConfig;
pub use conversation::ConversationHistory;
pub use error::ChatError;
pub use models::{DeltaStream, ModelClient};
pub use protocol::{ChatEvent, ChatRequest, ChatRole, ConversationTurn};
pub use tag_filter::{Segment, SegmentKind, TagFilter, TagMode, TagSpec};
