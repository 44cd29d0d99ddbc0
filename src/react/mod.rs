//! 执行层：单个 agent 的对话循环、结构化输出校验与过程事件

pub mod events;
pub mod loop_;
pub mod validator;

pub use events::{AgentEvent, Observer, PipelineEvent};
pub use loop_::{image_parts, AgentRun, AgentSession};
pub use validator::{extract_json, validate, OutputPhase, OutputValidator, StructuredOutput, Verdict};
