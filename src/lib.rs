//! Tripdesk - 多助手旅行客服编排核心
//!
//! 模块划分：
//! - **actions**: 动作描述、参数校验、注册表与执行器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 调度器、确认闸门、恢复策略、会话管理
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话记录与工作记忆
//! - **observability**: tracing 初始化
//! - **reasoning**: 推理适配器（LLM、规则、脚本）
//! - **scope**: 作用域表与委派栈
//! - **travel**: 旅行领域数据、动作与作用域

pub mod actions;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod reasoning;
pub mod scope;
pub mod travel;
