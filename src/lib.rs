//! # App Doc Crawler
//!
//! 一个用于自动化生成 Web 应用功能文档素材的 Rust 应用程序：
//! 登录目标应用、发现可导航的功能页面、在预算内挑选值得记录的功能，
//! 然后分两阶段（探索 → 记录）系统性地采集代表性截图与语义理解。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器会话），只暴露能力
//! - `BrowserDriver` - 浏览器自动化能力（导航 / 自然语言操作 / 观察 / 截图 / 页内执行）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个关注点
//! - `GenerationService` - 内容生成能力（文本 + 视觉）
//! - `budget` - 成本与预算估算（纯函数）
//! - `selection` - 功能挑选引擎（确定性）
//! - `CaptureGuard` - 去重与会话守卫
//! - `ScreenshotUploader` - 截图上传能力
//! - `Discoverer` - 登录与路由发现能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个功能"的完整两阶段采集流程
//! - `FeatureCtx` - 上下文封装（job_id + feature 索引）
//! - `FeatureFlow` - 流程编排（导航 → 健康检查 → 主图 → 探索 → 计划 → 执行 → 比较）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 任务流水线状态机，管理阶段推进与失败策略
//! - `orchestrator/screen_analysis` - 截图批量分析器，管理有界并发

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod store;
pub mod utils;
pub mod workflow;

#[cfg(test)]
pub mod fakes;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppResult, JobError};
pub use infrastructure::{BrowserDriver, CdpDriver, Observation};
pub use models::{
    CostEstimate, DiscoveryResult, Feature, Job, JobStatus, PageUnderstanding, ScreenRecord,
};
pub use orchestrator::JobPipeline;
pub use services::{CaptureGuard, GenerationService, OpenAiGeneration};
pub use workflow::{FeatureCtx, FeatureFlow, FlowOutcome};
