/// 同步引擎配置 - 终端同步的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/pos/terminal | 工作目录（本地数据库文件） |
/// | CLOUD_URL | http://localhost:4000 | 云端数据 API 地址 |
/// | REQUEST_TIMEOUT_MS | 30000 | 单次云端请求超时(毫秒) |
/// | SYNC_BATCH_MAX_ITEMS | 32 | 单批派发的最大条目数 |
/// | SYNC_BATCH_MAX_BYTES | 262144 | 单批派发的最大字节数 |
/// | SYNC_MAX_IN_FLIGHT | 8 | 同时在途的最大实体数 |
/// | SYNC_MAX_ATTEMPTS | 8 | 单条变更的最大重试次数 |
/// | SYNC_RETRY_BASE_MS | 5000 | 重试退避基础间隔(毫秒) |
/// | SYNC_RETRY_MAX_MS | 300000 | 重试退避最大间隔(毫秒) |
/// | PULL_INTERVAL_SECS | 60 | 对账拉取周期(秒) |
/// | PULL_PAGE_LIMIT | 500 | 单次拉取的最大记录数 |
/// | SCAN_INTERVAL_SECS | 30 | 队列扫描周期(秒) |
/// | GUARD_RETENTION_SECS | 604800 | 幂等记录保留时长(秒) |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/terminal CLOUD_URL=https://cloud.example.com cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储本地数据库文件
    pub work_dir: String,
    /// 云端数据 API 基础地址
    pub cloud_url: String,
    /// 单次云端请求超时 (毫秒)
    pub request_timeout_ms: u64,

    // === 派发批次限制 ===
    /// 单批最大条目数
    pub batch_max_items: usize,
    /// 单批最大字节数 (序列化后的 payload 大小)
    pub batch_max_bytes: usize,
    /// 同时在途的最大实体数
    pub max_entities_in_flight: usize,

    // === 重试策略 ===
    /// 单条变更的最大尝试次数，超过后转为永久失败
    pub max_attempts: u32,
    /// 退避基础间隔 (毫秒)
    pub retry_base_delay_ms: u64,
    /// 退避最大间隔 (毫秒)
    pub retry_max_delay_ms: u64,

    // === 对账拉取 ===
    /// 拉取周期 (秒)
    pub pull_interval_secs: u64,
    /// 单页最大记录数
    pub pull_page_limit: u32,

    // === 维护 ===
    /// 队列扫描周期 (秒)，兼做幂等记录清理
    pub scan_interval_secs: u64,
    /// 幂等记录保留时长 (秒)
    pub guard_retention_secs: u64,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/pos/terminal".into()),
            cloud_url: std::env::var("CLOUD_URL")
                .unwrap_or_else(|_| "http://localhost:4000".into()),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS", 30_000),
            batch_max_items: env_parse("SYNC_BATCH_MAX_ITEMS", 32),
            batch_max_bytes: env_parse("SYNC_BATCH_MAX_BYTES", 256 * 1024),
            max_entities_in_flight: env_parse("SYNC_MAX_IN_FLIGHT", 8),
            max_attempts: env_parse("SYNC_MAX_ATTEMPTS", 8),
            retry_base_delay_ms: env_parse("SYNC_RETRY_BASE_MS", 5_000),
            retry_max_delay_ms: env_parse("SYNC_RETRY_MAX_MS", 300_000),
            pull_interval_secs: env_parse("PULL_INTERVAL_SECS", 60),
            pull_page_limit: env_parse("PULL_PAGE_LIMIT", 500),
            scan_interval_secs: env_parse("SCAN_INTERVAL_SECS", 30),
            guard_retention_secs: env_parse("GUARD_RETENTION_SECS", 7 * 24 * 3600),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, cloud_url: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.cloud_url = cloud_url.into();
        config
    }

    /// 本地数据库文件路径
    pub fn db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("terminal-sync.redb")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let config = Config::with_overrides("/tmp/sync-test", "http://cloud.test");
        assert_eq!(config.work_dir, "/tmp/sync-test");
        assert_eq!(config.cloud_url, "http://cloud.test");
        assert_eq!(config.db_path().file_name().unwrap(), "terminal-sync.redb");
    }
}
