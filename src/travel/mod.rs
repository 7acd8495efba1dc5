//! 旅行客服领域：SQLite 数据、动作处理函数、作用域表与离线规则
//!
//! `build_runtime` 把这些拼成 [`Runtime`]：有 LLM Key 时所有作用域共享一个
//! [`LlmReasoningAdapter`]，否则每个作用域使用各自的规则适配器。

pub mod bookings;
pub mod calendar;
pub mod excursions;
pub mod flights;
pub mod rules;
pub mod scopes;
pub mod store;

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

pub use store::{StoreError, TravelStore};

use crate::actions::ActionRegistry;
use crate::config::AppConfig;
use crate::core::{create_llm_from_config, load_system_prompt, DispatchError, Runtime, RuntimeBuilder};
use crate::reasoning::{LlmReasoningAdapter, ReasoningAdapter};

/// 取非空字符串参数（去掉首尾空白）
pub(crate) fn text_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn int_arg(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

/// 注册全部旅行动作
pub fn register_actions(registry: &mut ActionRegistry, store: &TravelStore) -> Result<(), DispatchError> {
    bookings::register(registry, store, bookings::HOTEL)?;
    bookings::register(registry, store, bookings::CAR_RENTAL)?;
    excursions::register(registry, store)?;
    flights::register(registry, store)?;
    calendar::register(registry, store)?;
    Ok(())
}

/// 按配置打开数据库：未配置路径时使用内存库
pub fn open_store(config: &AppConfig) -> Result<TravelStore, StoreError> {
    match &config.store.path {
        Some(path) => TravelStore::open(path),
        None => TravelStore::in_memory(),
    }
}

pub fn build_runtime(config: AppConfig, store: &TravelStore) -> anyhow::Result<Runtime> {
    let llm: Option<Arc<dyn ReasoningAdapter>> = create_llm_from_config(&config)
        .map(|client| Arc::new(LlmReasoningAdapter::new(client, load_system_prompt())) as Arc<dyn ReasoningAdapter>);
    if llm.is_none() {
        tracing::info!("using offline rule adapters");
    }

    let adapter_for = |name: &str| -> anyhow::Result<Arc<dyn ReasoningAdapter>> {
        match &llm {
            Some(shared) => Ok(Arc::clone(shared)),
            None => Ok(Arc::new(
                rules::rule_adapter(name).with_context(|| format!("rules for scope {name}"))?,
            )),
        }
    };

    let (primary, specialists) = scopes::SCOPES
        .split_first()
        .context("scope table is empty")?;
    let mut builder = RuntimeBuilder::new(config, primary.build(adapter_for(primary.name)?));
    register_actions(builder.registry_mut(), store)?;
    for spec in specialists {
        builder = builder.scope(spec.build(adapter_for(spec.name)?))?;
    }
    Ok(builder.build()?)
}
