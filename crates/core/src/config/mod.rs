//! 配置管理
//!
//! 配置按以下顺序合并，后者覆盖前者：
//!
//! 1. 各配置段的默认值
//! 2. TOML配置文件（`--config` 指定，或 `config/reminder.toml`）
//! 3. 环境变量，前缀 `REMINDER_`，嵌套字段用 `__` 分隔
//!
//! ```text
//! REMINDER_LOCK__BACKEND=redis
//! REMINDER_FANOUT__MAX_PARALLEL_SENDS=8
//! ```
//!
//! 加载后逐段校验，错误信息带有所在配置段的上下文。

pub mod models;

pub use models::*;
pub use models::app_config::{generate_node_id, DEFAULT_CONFIG_PATHS};
