//! 功能模型
//!
//! "功能"是指被挑选出来准备记录文档的页面 / 能力。

use serde::{Deserialize, Serialize};

/// slug 最大长度
pub const MAX_SLUG_LEN: usize = 60;

/// 合并进某个功能的子页面
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPage {
    pub route: String,
    pub title: String,
}

/// 入选的功能
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    /// 唯一 slug，不超过 60 个字符
    pub slug: String,
    pub description: String,
    /// 来源路由
    pub source_route: String,
    pub has_form: bool,
    /// 优先级，从 1 开始且连续，最终排序后重新赋值
    pub priority: usize,
    /// 同父分类合并产生的子页面列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_pages: Vec<SubPage>,
}

/// 落选的候选功能，只保留标题和描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalFeature {
    pub title: String,
    pub description: String,
}

/// 从名称生成 slug
///
/// 小写、非字母数字折叠为 `-`、截断到 60 个字符。
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("page");
    }
    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
