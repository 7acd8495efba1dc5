//! 运行时构建器：统一的作用域、动作与执行器初始化逻辑
//!
//! CLI 与 HTTP 前端共享同一套构建流程；build 时检查每个作用域声明的动作都已注册。

use std::sync::Arc;

use crate::actions::{ActionDescriptor, ActionExecutor, ActionHandler, ActionRegistry};
use crate::config::AppConfig;
use crate::core::{DispatchError, RecoveryEngine, Runtime};
use crate::llm::{LlmClient, OpenAiClient};
use crate::scope::{Scope, ScopeTable};

const DEFAULT_SYSTEM_PROMPT: &str = "You are part of a travel customer-support team. \
Answer briefly, use the listed actions to look things up, and never claim a booking \
changed unless an action result says so.";

/// 运行时构建器：先注册动作再注册作用域，最后 build
pub struct RuntimeBuilder {
    config: AppConfig,
    scopes: ScopeTable,
    registry: ActionRegistry,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig, primary: Scope) -> Self {
        Self {
            config,
            scopes: ScopeTable::new(primary),
            registry: ActionRegistry::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn action(
        mut self,
        descriptor: ActionDescriptor,
        handler: impl ActionHandler + 'static,
    ) -> Result<Self, DispatchError> {
        self.registry.register(descriptor, handler)?;
        Ok(self)
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    pub fn scope(mut self, scope: Scope) -> Result<Self, DispatchError> {
        self.scopes.register(scope)?;
        Ok(self)
    }

    /// 构建只读共享的运行时；作用域引用了未注册的动作时报 UnknownAction
    pub fn build(self) -> Result<Runtime, DispatchError> {
        for name in self.scopes.names() {
            let id = self.scopes.lookup(name)?;
            let scope = self.scopes.get(id)?;
            if let Some(missing) = scope.actions().find(|a| !self.registry.contains(a)) {
                return Err(DispatchError::UnknownAction(missing.clone()));
            }
        }
        tracing::info!(
            scopes = self.scopes.len(),
            actions = self.registry.len(),
            "runtime assembled"
        );
        Ok(Runtime {
            executor: ActionExecutor::new(self.config.actions.timeout_secs),
            recovery: RecoveryEngine::new(),
            settings: self.config.dispatcher_settings(),
            scopes: self.scopes,
            registry: self.registry,
        })
    }
}

/// 按配置与环境变量选择 LLM；没有任何 API Key 或 provider 为 rules 时返回 None
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "rules" {
        tracing::info!("Using offline rule adapters (provider = rules)");
        return None;
    }
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg.llm.model.clone().unwrap_or_else(|| crate::llm::DEEPSEEK_CHAT.to_string());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Some(Arc::new(OpenAiClient::deepseek(Some(&model))))
    } else if use_openai {
        let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Some(Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        )))
    } else {
        tracing::warn!("No API key set, using offline rule adapters");
        None
    }
}

/// 系统提示词：config/prompts/system.md 优先，否则用内置默认值
pub fn load_system_prompt() -> String {
    ["config/prompts/system.md", "../config/prompts/system.md"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{handler_fn, ArgSchema};
    use crate::reasoning::ScriptedAdapter;
    use serde_json::Value;

    #[test]
    fn test_build_rejects_scope_with_unregistered_action() {
        let primary = Scope::new("primary", "", ScriptedAdapter::shared());
        let result = RuntimeBuilder::new(AppConfig::default(), primary)
            .scope(Scope::new("hotel", "", ScriptedAdapter::shared()).with_actions(&["book_hotel"]))
            .unwrap()
            .build();
        assert!(matches!(result, Err(DispatchError::UnknownAction(n)) if n == "book_hotel"));
    }

    #[test]
    fn test_build_uses_config() {
        let mut cfg = AppConfig::default();
        cfg.app.max_steps_per_turn = 2;
        let primary = Scope::new("primary", "", ScriptedAdapter::shared()).with_actions(&["ping"]);
        let runtime = RuntimeBuilder::new(cfg, primary)
            .action(
                ActionDescriptor::read_only("ping", "", ArgSchema::new()),
                handler_fn(|_| async { Ok(Value::Null) }),
            )
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(runtime.settings.max_steps_per_turn, 2);
        assert_eq!(runtime.registry.len(), 1);
    }

    #[test]
    fn test_rules_provider_skips_llm() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "rules".to_string();
        assert!(create_llm_from_config(&cfg).is_none());
    }
}
