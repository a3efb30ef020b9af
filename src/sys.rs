//! 进程级资源设置

/// 把 `RLIMIT_NOFILE` 软限制提高到 `target`（不超过硬限制，不会调低）
///
/// 返回生效后的软限制；不支持的平台直接返回 `target`
pub fn raise_nofile_limit(target: u64) -> std::io::Result<u64> {
    rlimit::increase_nofile_limit(target)
}
