//! 核心层：错误与恢复、会话监管（取消）、流水线状态

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, ConvergenceError, LlmError, RecoveryAction};
pub use recovery::{RecoveryEngine, CORRECTIVE_INSTRUCTION};
pub use session_supervisor::SessionSupervisor;
pub use state::{LoggedEvent, PipelineState, ScreenshotEntry, SkipReason, StageId, StageStatus};
