//! 路由发现结果
//!
//! 由发现阶段一次性产出，之后不可变。

use serde::{Deserialize, Serialize};

/// 单个路由的发现结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// 路由路径（如 `/settings/profile`）
    pub route: String,
    /// 页面标题
    pub title: String,
    /// 页面是否可访问
    pub accessible: bool,
    /// 是否是错误页
    pub error_page: bool,
    /// 页面是否包含表单
    pub has_form: bool,
    /// 页面是否包含表格
    pub has_table: bool,
    /// 父分类提示（如 `/settings/profile` 的 `settings`）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_category: Option<String>,
}

impl DiscoveryResult {
    /// 创建一个可访问的默认结果
    pub fn new(route: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            title: title.into(),
            accessible: true,
            error_page: false,
            has_form: false,
            has_table: false,
            parent_category: None,
        }
    }

    /// 路由深度（`/settings/profile` 为 2）
    pub fn depth(&self) -> usize {
        self.route.split('/').filter(|s| !s.is_empty()).count()
    }
}
