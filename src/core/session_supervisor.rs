//! 运行监管：整次流水线的取消令牌
//!
//! Ctrl+C 时取消整次运行；每个阶段持有子 token，取消在下一个挂起点（等待模型 / 工具批次结束后）生效。

use tokio_util::sync::CancellationToken;

/// 运行级生命周期管理
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 复用外部令牌（如测试中提前持有的 token）
    pub fn with_token(cancel_token: CancellationToken) -> Self {
        Self { cancel_token }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个阶段）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}
