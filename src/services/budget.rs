//! 成本与预算估算 - 业务能力层
//!
//! 纯函数，不产生任何副作用。
//!
//! 职责：
//! - 由预算推导本次任务最多记录多少个功能
//! - 估算整体花费
//! - 对预算单调，且永不超过免费层上限

use crate::models::CostEstimate;

/// 预算参数（全部为最小货币单位）
#[derive(Debug, Clone)]
pub struct BudgetParams {
    /// 固定开销
    pub fixed_overhead_cents: i64,
    /// 每个功能的采集成本
    pub per_feature_cost_cents: i64,
    /// 每张截图的成本
    pub per_screen_cost_cents: i64,
    /// 每个功能的文案成本
    pub per_feature_prose_cents: i64,
    /// 横切成本（与功能数无关）
    pub cross_cutting_cents: i64,
    /// 免费层功能数量上限
    pub free_tier_cap: usize,
}

/// 由预算推导最多可记录的功能数
///
/// `clamp(floor((budget - overhead) / per_feature), 1, min(candidates, cap))`。
/// 没有候选时返回 0。
pub fn max_features(budget_cents: i64, candidate_count: usize, params: &BudgetParams) -> usize {
    let upper = candidate_count.min(params.free_tier_cap);
    if upper == 0 {
        return 0;
    }

    let spendable = budget_cents - params.fixed_overhead_cents;
    let affordable = if params.per_feature_cost_cents <= 0 {
        upper as i64
    } else {
        spendable / params.per_feature_cost_cents
    };

    (affordable.max(1) as usize).min(upper)
}

/// 估算整体花费
///
/// 截图数按"主图 + 平均一张操作图"估算为功能数 x 2；
/// 真实挑选完成后会用实际功能数重新估算一次。
pub fn estimate(budget_cents: i64, candidate_count: usize, params: &BudgetParams) -> CostEstimate {
    let planned = max_features(budget_cents, candidate_count, params);
    estimate_for(planned, candidate_count, params)
}

/// 用确定的功能数重新估算
pub fn estimate_for(
    features_planned: usize,
    candidate_count: usize,
    params: &BudgetParams,
) -> CostEstimate {
    let screens_estimated = features_planned * 2;
    let estimated_spend_cents = params.fixed_overhead_cents
        + screens_estimated as i64 * params.per_screen_cost_cents
        + features_planned as i64 * params.per_feature_prose_cents
        + params.cross_cutting_cents;

    CostEstimate {
        screens_estimated,
        features_planned,
        features_available: candidate_count,
        features_cut_for_budget: candidate_count.saturating_sub(features_planned),
        estimated_spend_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BudgetParams {
        BudgetParams {
            fixed_overhead_cents: 500,
            per_feature_cost_cents: 300,
            per_screen_cost_cents: 25,
            per_feature_prose_cents: 50,
            cross_cutting_cents: 100,
            free_tier_cap: 10,
        }
    }

    #[test]
    fn test_monotonic_in_budget() {
        let p = params();
        // 对 B1 ≤ B2，max_features(B1) ≤ max_features(B2) ≤ 免费层上限
        let budgets = [0, 500, 800, 1100, 2000, 3500, 10000, 100000];
        let mut last = 0;
        for b in budgets {
            let m = max_features(b, 20, &p);
            assert!(m >= last, "预算 {} 时不应回落", b);
            assert!(m <= p.free_tier_cap);
            last = m;
        }
    }

    #[test]
    fn test_never_exceeds_candidates() {
        let p = params();
        assert_eq!(max_features(1_000_000, 3, &p), 3);
        assert_eq!(max_features(1_000_000, 0, &p), 0);
    }

    #[test]
    fn test_lower_clamp_is_one() {
        let p = params();
        // 有候选时预算再小也保底 1 个
        assert_eq!(max_features(0, 5, &p), 1);
    }

    #[test]
    fn test_cut_for_budget_counts() {
        let p = params();
        // 预算只够 10 个候选中的 3 个
        let budget = p.fixed_overhead_cents + 3 * p.per_feature_cost_cents;
        let est = estimate(budget, 10, &p);
        assert_eq!(est.features_planned, 3);
        assert_eq!(est.features_cut_for_budget, 7);
        assert_eq!(est.screens_estimated, 6);
    }

    #[test]
    fn test_spend_formula() {
        let p = params();
        let est = estimate_for(4, 10, &p);
        let expected = 500 + 8 * 25 + 4 * 50 + 100;
        assert_eq!(est.estimated_spend_cents, expected);
    }
}
