//! # 数据模型
//!
//! 提醒系统的核心数据结构：定时任务、执行日志、消息记录、推送配置、
//! 标签路由和投递记录。
//!
//! ## 状态流转
//!
//! ### 任务状态
//! ```text
//! enabled ⇄ disabled        (用户操作)
//! enabled → completed        (执行器在终止条件满足时)
//! any     → deleted          (软删除，行保留)
//! ```
//!
//! ### 单次触发
//! ```text
//! Scheduled → LockAttempt → LockDenied ⇒ Skipped
//!                         → LockGranted → EligibilityRecheck → Ineligible ⇒ Skipped
//!                                                            → Eligible → Dispatch ⇒ Success | Failed
//! ```
//!
//! ## 存储映射
//!
//! 枚举字段在SQLite中以小写文本保存，由 [`impl_sqlite_text_enum`](crate::impl_sqlite_text_enum)
//! 统一实现 `sqlx` 的编解码。

pub mod delivery;
pub mod destination;
pub mod execution_log;
pub mod message;
pub mod push_request;
pub mod task;
pub mod user;

pub use delivery::*;
pub use destination::*;
pub use execution_log::*;
pub use message::*;
pub use push_request::*;
pub use task::*;
pub use user::*;

/// 为实现了 `as_str` 与 `FromStr` 的枚举生成SQLite文本列编解码
#[macro_export]
macro_rules! impl_sqlite_text_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                s.parse::<$ty>().map_err(|e| e.to_string().into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut <sqlx::Sqlite as sqlx::Database>::ArgumentBuffer<'q>,
            ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }
    };
}
