//! 页面理解模型
//!
//! 探索阶段由内容生成服务产出，立即被消费，不落库。

use serde::{Deserialize, Serialize};

/// 页面复杂度层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl Complexity {
    /// 宽松解析（生成服务的输出不保证规范）
    pub fn parse_lenient(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        if s.contains("simple") {
            Complexity::Simple
        } else if s.contains("complex") {
            Complexity::Complex
        } else {
            Complexity::Moderate
        }
    }
}

/// 交互元素类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Link,
    Input,
    Select,
    Toggle,
    Tab,
    Menu,
    Other,
}

impl ElementKind {
    /// 宽松解析
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "button" => ElementKind::Button,
            "link" | "anchor" | "a" => ElementKind::Link,
            "input" | "textbox" | "textarea" | "field" => ElementKind::Input,
            "select" | "dropdown" => ElementKind::Select,
            "toggle" | "switch" | "checkbox" => ElementKind::Toggle,
            "tab" => ElementKind::Tab,
            "menu" => ElementKind::Menu,
            _ => ElementKind::Other,
        }
    }

    /// 是否值得轻探（纯链接和输入框不值得）
    pub fn is_probe_worthy(self) -> bool {
        matches!(
            self,
            ElementKind::Button | ElementKind::Tab | ElementKind::Menu | ElementKind::Select
        )
    }
}

/// 页面上的交互元素
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    /// 元素描述
    pub description: String,
    /// 元素类型标签
    pub kind: ElementKind,
    /// 自然语言探测指令
    pub probe: String,
}

/// 页面理解
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageUnderstanding {
    /// 页面用途
    pub purpose: String,
    /// 1-4 条用户目标
    pub user_goals: Vec<String>,
    /// 交互元素列表
    pub elements: Vec<InteractiveElement>,
    /// 是否处于空状态
    pub empty_state: bool,
    /// 空状态下的行动号召（如"新建项目"按钮）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_state_cta: Option<String>,
    /// 相关功能
    pub related_features: Vec<String>,
    /// 复杂度层级
    pub complexity: Complexity,
}

impl PageUnderstanding {
    /// 生成服务输出不可用时的兜底理解
    pub fn fallback(route: &str) -> Self {
        Self {
            purpose: format!("页面 {} 的用途未能识别", route),
            user_goals: vec!["浏览页面内容".to_string()],
            elements: Vec::new(),
            empty_state: false,
            empty_state_cta: None,
            related_features: Vec::new(),
            complexity: Complexity::Moderate,
        }
    }

    /// 是否可以整体跳过记录阶段
    ///
    /// 复杂度为 simple 且无交互元素的页面只保留主图。
    pub fn skip_document_phase(&self) -> bool {
        self.complexity == Complexity::Simple && self.elements.is_empty()
    }
}
