//! 成本估算模型
//!
//! 估算结果只计算、不持久化。

use serde::{Deserialize, Serialize};

/// 成本估算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// 估算的截图数量
    pub screens_estimated: usize,
    /// 计划记录的功能数
    pub features_planned: usize,
    /// 可用的候选功能数
    pub features_available: usize,
    /// 因预算被裁掉的功能数
    pub features_cut_for_budget: usize,
    /// 估算花费（最小货币单位）
    pub estimated_spend_cents: i64,
}
