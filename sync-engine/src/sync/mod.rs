//! 同步模块 - 派发器、冲突解决、对账拉取

pub mod backoff;
pub mod dispatcher;
pub mod puller;
pub mod resolver;

pub use backoff::BackoffPolicy;
pub use dispatcher::SyncDispatcher;
pub use puller::ReconciliationPuller;
pub use resolver::{ConflictResolver, Resolution};
