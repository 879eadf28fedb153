//! 功能采集上下文
//!
//! 封装"我正在采集哪个任务的第几个功能"这一信息

use std::fmt::Display;

/// 功能采集上下文
#[derive(Debug, Clone)]
pub struct FeatureCtx {
    /// 任务 ID
    pub job_id: String,

    /// 功能序号（从 1 开始，仅用于日志显示）
    pub feature_index: usize,

    /// 本次任务的功能总数
    pub feature_total: usize,
}

impl FeatureCtx {
    /// 创建新的功能上下文
    pub fn new(job_id: String, feature_index: usize, feature_total: usize) -> Self {
        Self {
            job_id,
            feature_index,
            feature_total,
        }
    }
}

impl Display for FeatureCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[功能 {}/{}]", self.feature_index, self.feature_total)
    }
}
