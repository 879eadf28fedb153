//! 截图记录与截图计划模型

use serde::{Deserialize, Serialize};

/// 截图记录状态：crawled → analyzed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenStatus {
    Crawled,
    Analyzed,
    Failed,
}

/// 截图计划
///
/// 每个功能在主图之外最多 2 个计划。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotPlan {
    /// 计划描述
    pub description: String,
    /// 有序的自然语言操作序列
    pub actions: Vec<String>,
    /// 一句话教学价值
    #[serde(default)]
    pub value: String,
    /// 执行后是否提交
    #[serde(default)]
    pub submit_after: bool,
    /// 提交后是否补拍结果图
    #[serde(default)]
    pub capture_result: bool,
}

/// 截图记录
///
/// 不变式：同一次任务运行中 (url, DOM 哈希) 唯一，
/// 显式豁免的追拍（同一 URL 上的 action / result 图）除外。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenRecord {
    pub id: String,
    pub url: String,
    /// 路由路径
    pub route: String,
    /// 导航标签
    pub nav_label: String,
    /// 截图引用（上传后的地址或本地引用）
    pub screenshot_ref: String,
    /// 原始页面标记快照
    pub markup: String,
    /// 可选的代码上下文
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_context: Option<String>,
    /// 页面类型标签（分析阶段填充）
    #[serde(default)]
    pub screen_type: String,
    /// 所属功能 id
    pub feature_id: String,
    /// 标签：hero / action-N / result-N
    pub label: String,
    /// 顺序索引
    pub order_index: usize,
    pub status: ScreenStatus,
}

impl ScreenRecord {
    /// 主图标签
    pub fn hero_label() -> String {
        "hero".to_string()
    }

    /// 操作图标签
    pub fn action_label(n: usize) -> String {
        format!("action-{}", n)
    }

    /// 结果图标签
    pub fn result_label(n: usize) -> String {
        format!("result-{}", n)
    }
}
