//! Worker选择
//!
//! 选择策略只有这一处定义：对同一快照与约束，结果完全确定，
//! 便于独立测试，也避免各调用点各自拼装启发式。

use std::cmp::Ordering;

use gridpool_domain::entities::{SelectionConstraints, WorkerInfo};
use tracing::debug;

/// 从快照中选出最适合接收作业的Worker
///
/// 1. 过滤在线Worker；
/// 2. 应用硬约束（GPU数量下限、内存占用上限）；
/// 3. 按负载得分升序排序，平分时GPU多者优先，再按名字字典序保证确定性。
pub fn select_worker<'a>(
    snapshot: &'a [WorkerInfo],
    constraints: &SelectionConstraints,
) -> Option<&'a WorkerInfo> {
    let mut candidates: Vec<&WorkerInfo> = snapshot
        .iter()
        .filter(|w| w.is_online())
        .filter(|w| w.gpu_count >= constraints.min_gpus)
        .filter(|w| {
            constraints
                .max_memory_percent
                .map_or(true, |max| w.memory_percent <= max)
        })
        .collect();

    if candidates.is_empty() {
        debug!("没有满足约束的在线Worker");
        return None;
    }

    candidates.sort_by(|a, b| {
        a.load_score()
            .partial_cmp(&b.load_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.gpu_count.cmp(&a.gpu_count))
            .then_with(|| a.name.cmp(&b.name))
    });

    let selected = candidates[0];
    debug!(
        "选中Worker: {} (负载: {:.1}, GPU: {})",
        selected.name,
        selected.load_score(),
        selected.gpu_count
    );
    Some(selected)
}
