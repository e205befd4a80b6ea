pub mod config;
pub mod errors;
pub mod id_generator;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use id_generator::IdGenerator;
pub use traits::*;
pub use errors::*;

/// 统一的Result类型
pub type ReminderResult<T> = std::result::Result<T, ReminderError>;
