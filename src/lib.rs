//! Sea - 多智能体站点演进分析
//!
//! 模块划分：
//! - **agents**: 各阶段的 prompt、输入裁剪与基于对话循环的执行器
//! - **config**: 引擎配置（TOML + 环境变量）与单次分析配置
//! - **core**: 错误、恢复策略、运行监管与流水线状态
//! - **llm**: 模型传输抽象与实现（OpenAI 兼容 / 限流重试 / 脚本化）
//! - **memory**: 对话消息与快照持久化
//! - **observability**: 日志初始化与进度打印
//! - **react**: 对话循环、结构化输出校验与事件
//! - **report**: ReportBundle 与 Markdown 渲染
//! - **schemas**: 各阶段的结构化输出类型
//! - **tools**: 工具注册、分发、预算与代码库 / 网页工具
//! - **workflow**: 依赖图、调度器与增量合并

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod report;
pub mod schemas;
pub mod tools;
pub mod workflow;
