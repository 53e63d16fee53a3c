//! Terminal Sync Engine - 离线优先终端同步引擎
//!
//! # 架构概述
//!
//! 本模块让 POS/KDS 终端在断网时继续接单，恢复连接后与云端权威数据库
//! 对账，保证不丢单、不重复：
//!
//! - **本地存储** (`store`): 嵌入式 redb 存储（业务实体 + 变更队列）
//! - **派发器** (`sync::dispatcher`): 后台循环，将队列变更推送到云端
//! - **冲突解决** (`sync::resolver`): 按实体类型的冲突解决策略
//! - **对账拉取** (`sync::puller`): 周期性拉取云端权威数据
//! - **云端接口** (`remote`): 请求/响应数据 API 客户端
//!
//! # 模块结构
//!
//! ```text
//! sync-engine/src/
//! ├── core/          # 配置、后台任务管理
//! ├── store/         # 本地存储（实体 + 变更队列 + 幂等保护）
//! ├── sync/          # 派发器、冲突解决、对账拉取、退避
//! ├── remote/        # 云端 API 客户端
//! ├── engine.rs      # 对外门面
//! └── utils/         # 错误、日志
//! ```

pub mod core;
pub mod engine;
pub mod remote;
pub mod store;
pub mod sync;
pub mod utils;

// Re-export 公共类型
pub use core::{BackgroundTasks, Config, TaskKind};
pub use engine::SyncEngine;
pub use remote::{HttpRemoteStore, RemoteError, RemoteStore};
pub use store::{LocalStore, MutationEntry, MutationStatus, QueueStats, StoreError, VersionedRecord};
pub use utils::{SyncError, SyncResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};
