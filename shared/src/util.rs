/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a globally unique mutation ID (idempotency key).
///
/// UUIDv4 — the same key is resubmitted on every retry of a mutation so the
/// cloud can deduplicate, so it must never be derived from retry state.
pub fn mutation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
