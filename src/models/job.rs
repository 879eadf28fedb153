//! 任务模型
//!
//! 任务行由编排层独占修改（状态、预算），采集引擎只负责清除凭据。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::models::discovery::DiscoveryResult;
use crate::models::feature::{AdditionalFeature, Feature};

/// 任务阶段状态
///
/// 阶段顺序固定：queued → analyzing_code → analyzing_prd → discovering →
/// planning_features → crawling → analyzing_screens → generating_docs →
/// {completed | failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    AnalyzingCode,
    AnalyzingPrd,
    Discovering,
    PlanningFeatures,
    Crawling,
    AnalyzingScreens,
    GeneratingDocs,
    Completed,
    Failed,
}

impl JobStatus {
    /// 获取阶段名称
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::AnalyzingCode => "analyzing_code",
            JobStatus::AnalyzingPrd => "analyzing_prd",
            JobStatus::Discovering => "discovering",
            JobStatus::PlanningFeatures => "planning_features",
            JobStatus::Crawling => "crawling",
            JobStatus::AnalyzingScreens => "analyzing_screens",
            JobStatus::GeneratingDocs => "generating_docs",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// 是否是终态
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 登录凭据（短暂存在，用完即清除）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// 进度日志条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Info,
    Error,
    Complete,
}

/// 进度日志条目（追加写，不修改）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    pub at: DateTime<Local>,
}

impl ProgressEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Info,
            message: message.into(),
            screenshot_ref: None,
            at: Local::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Error,
            message: message.into(),
            screenshot_ref: None,
            at: Local::now(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Complete,
            message: message.into(),
            screenshot_ref: None,
            at: Local::now(),
        }
    }
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// 目标应用 URL
    pub app_url: String,
    /// 登录页 URL（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    /// 登录凭据（可选，必须在不再需要时清除）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// 预算（最小货币单位，如"分"）
    pub budget_cents: i64,
    /// 已花费（最小货币单位）
    pub spent_cents: i64,
    /// 发现阶段产出的路由集合
    #[serde(default)]
    pub discovered_routes: Vec<DiscoveryResult>,
    /// 入选的功能列表
    #[serde(default)]
    pub selected_features: Vec<Feature>,
    /// 落选功能（只保留标题 + 描述）
    #[serde(default)]
    pub additional_features: Vec<AdditionalFeature>,
    /// 失败时的错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Local>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Local>>,
}

impl Job {
    /// 创建一个排队中的新任务
    pub fn new(id: impl Into<String>, app_url: impl Into<String>, budget_cents: i64) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            app_url: app_url.into(),
            login_url: None,
            credentials: None,
            budget_cents,
            spent_cents: 0,
            discovered_routes: Vec::new(),
            selected_features: Vec::new(),
            additional_features: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// 剩余预算
    pub fn remaining_budget(&self) -> i64 {
        self.budget_cents - self.spent_cents
    }

    /// 清除凭据
    ///
    /// 凭据一旦不再需要就立即清除；顶层异常处理中还会防御性地再清一次。
    pub fn erase_credentials(&mut self) {
        self.credentials = None;
    }
}
