//! 可观测性：tracing 订阅器初始化
//!
//! 过滤级别取 RUST_LOG，未设置时为 info；重复初始化（如测试中）会被忽略。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
