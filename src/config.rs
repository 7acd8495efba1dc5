//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIPDESK__*` 覆盖（双下划线表示嵌套，如 `TRIPDESK__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::DispatcherSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub actions: ActionsSection,
    pub delegation: DelegationSection,
    pub store: StoreSection,
    pub server: ServerSection,
}

/// [app] 段：应用名、单轮推理步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单个入站轮次内最多调用推理适配器的次数
    pub max_steps_per_turn: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_steps_per_turn: 6,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / rules；有对应 API Key 时才会启用 LLM
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次推理调用超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [actions] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionsSection {
    /// 单次动作调用超时（秒）
    pub timeout_secs: u64,
}

impl Default for ActionsSection {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// [delegation] 段：委派栈深度与携带字段上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelegationSection {
    pub max_depth: usize,
    pub max_carry_fields: usize,
}

impl Default for DelegationSection {
    fn default() -> Self {
        Self {
            max_depth: crate::scope::stack::DEFAULT_MAX_DEPTH,
            max_carry_fields: crate::scope::stack::DEFAULT_MAX_CARRY_FIELDS,
        }
    }
}

/// [store] 段：旅行数据库路径，未设置时使用内存库
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl AppConfig {
    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            max_steps_per_turn: self.app.max_steps_per_turn.max(1),
            reasoning_timeout: Duration::from_secs(self.llm.timeouts.request.max(1)),
            max_depth: self.delegation.max_depth,
            max_carry_fields: self.delegation.max_carry_fields,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRIPDESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRIPDESK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIPDESK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
