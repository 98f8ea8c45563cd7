//! 记忆层：会话消息（短期）与运行 Transcript（审计 / 回放）

pub mod conversation;
pub mod transcript;

pub use conversation::{ConversationMemory, Message, Role};
pub use transcript::{preview, EntryKind, TranscriptEntry, TranscriptLog};
