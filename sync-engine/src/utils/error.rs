//! 统一错误处理
//!
//! 错误分类对应重试语义：
//!
//! | 分类 | 处理 |
//! |------|------|
//! | Transient | 指数退避重试，封顶次数 |
//! | Conflict | 按实体类型解决，解决失败转 Permanent |
//! | Permanent | 不再重试，通过回调上报操作员 |
//! | Store | 本地存储失败，触发写入的前台操作直接失败 |

use crate::remote::RemoteError;
use crate::store::StoreError;
use thiserror::Error;

/// 同步引擎错误枚举
#[derive(Debug, Error)]
pub enum SyncError {
    /// 本地存储错误 — 前台写入必须失败，不允许静默丢失变更
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 云端请求错误
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// 工作目录等文件系统错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 请求校验失败
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 变更不存在
    #[error("Mutation not found: {0}")]
    MutationNotFound(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
