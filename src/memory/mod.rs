//! 记忆层：单次对话的消息历史与流水线快照持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{ContentPart, Message, Role, ToolCall};
pub use persistence::SnapshotStore;
