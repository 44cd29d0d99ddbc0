//! 各分析阶段的 agent：prompt、输入裁剪与基于对话循环的执行器

pub mod executor;
pub mod inputs;
pub mod prompts;

pub use executor::AgentStageExecutor;
pub use inputs::{features_for_run, parity_sources};
pub use prompts::system_prompt;
