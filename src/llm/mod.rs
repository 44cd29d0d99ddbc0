//! 模型传输层：OpenAI 兼容实现、限流重试包装、脚本化传输与 dry-run 固定回复

pub mod dry_run;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use dry_run::dry_run_transport;
pub use mock::{RecordedRequest, ScriptStep, ScriptedTransport};
pub use openai::{OpenAiTransport, TokenUsage};
pub use retry::{RetryConfig, RetryingTransport};
pub use traits::{AssistantTurn, ChatRequest, ModelTransport, ToolFormat, Usage};
