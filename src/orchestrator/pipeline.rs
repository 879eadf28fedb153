//! 任务流水线 - 编排层
//!
//! ## 职责
//!
//! 单个任务从排队到终态的完整状态机：
//!
//! queued → analyzing_code → analyzing_prd → discovering →
//! planning_features → crawling → analyzing_screens → generating_docs →
//! {completed | failed}
//!
//! ## 失败策略
//!
//! - 预算闸门：剩余预算 ≤ 0 时在任何付费工作前直接失败
//! - 代码 / 需求分析失败：降级为空摘要继续
//! - 登录尝试耗尽：致命，清除凭据后终止
//! - 功能挑选失败：降级为零功能（由最低截图数检查兜住）
//! - 爬取失败：逐功能容错；阶段成败看重新查询的已持久化截图数
//! - 截图分析失败：尽力而为，永不致命
//! - 文档生成失败：致命
//!
//! 凭据一旦不再需要立即清除，顶层异常处理中再防御性清一次。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AuthError, JobError, PipelineError};
use crate::infrastructure::BrowserDriver;
use crate::models::{DiscoveryResult, Job, JobStatus, ProgressEntry};
use crate::orchestrator::screen_analysis;
use crate::services::budget;
use crate::services::discovery::Discoverer;
use crate::services::generation::GenOptions;
use crate::services::{select_features, GenerationService, ScreenshotUploader, SelectionInput};
use crate::store::JobStore;
use crate::workflow::{CrawlState, FeatureCtx, FeatureFlow, FlowOutcome};

/// 任务流水线
///
/// 唯一有权修改任务行（状态、预算、功能列表）的模块。
pub struct JobPipeline {
    store: Arc<dyn JobStore>,
    browser: Arc<dyn BrowserDriver>,
    generation: Arc<dyn GenerationService>,
    uploader: Arc<ScreenshotUploader>,
    config: Config,
}

impl JobPipeline {
    /// 创建新的任务流水线
    pub fn new(
        store: Arc<dyn JobStore>,
        browser: Arc<dyn BrowserDriver>,
        generation: Arc<dyn GenerationService>,
        uploader: Arc<ScreenshotUploader>,
        config: Config,
    ) -> Self {
        Self {
            store,
            browser,
            generation,
            uploader,
            config,
        }
    }

    /// 运行任务直到终态
    ///
    /// 顶层包装：失败时落库失败状态并防御性清除凭据。
    pub async fn run(&self, job_id: &str) -> Result<()> {
        let result = self.execute(job_id).await;

        match &result {
            Ok(()) => {
                // 成功路径已清过凭据，这里再防御性确认一次
                if let Ok(mut job) = self.store.load_job(job_id).await {
                    if job.credentials.is_some() {
                        job.erase_credentials();
                        let _ = self.store.save_job(&job).await;
                    }
                }
            }
            Err(e) => {
                error!("❌ [{}] 任务失败: {}", job_id, e);
                if let Ok(mut job) = self.store.load_job(job_id).await {
                    job.erase_credentials();
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.completed_at = Some(Local::now());
                    let _ = self.store.save_job(&job).await;
                    let _ = self
                        .store
                        .append_progress(job_id, ProgressEntry::error(format!("任务失败: {}", e)))
                        .await;
                }
            }
        }

        result
    }

    async fn execute(&self, job_id: &str) -> Result<()> {
        let mut job = self.store.load_job(job_id).await?;
        log_job_start(&job);

        // ========== 预算闸门 ==========
        let remaining = job.remaining_budget();
        if remaining <= 0 {
            return Err(JobError::Pipeline(PipelineError::BudgetExhausted { remaining }).into());
        }

        // ========== 阶段 1-2: 代码与需求分析（降级容错） ==========
        self.advance(&mut job, JobStatus::AnalyzingCode).await?;
        let code_summary = self.opaque_analysis(&job, "代码库").await;

        self.advance(&mut job, JobStatus::AnalyzingPrd).await?;
        let prd_summary = self.opaque_analysis(&job, "产品需求").await;

        // ========== 阶段 3: 发现 ==========
        self.advance(&mut job, JobStatus::Discovering).await?;
        let post_login_route = self.discover(&mut job).await?;

        // ========== 阶段 4: 功能挑选 ==========
        self.advance(&mut job, JobStatus::PlanningFeatures).await?;
        self.plan_features(&mut job, post_login_route.as_deref())
            .await?;

        // ========== 阶段 5: 爬取 ==========
        self.advance(&mut job, JobStatus::Crawling).await?;
        self.crawl(&mut job).await?;

        // 凭据不再需要，立即清除
        job.erase_credentials();
        self.store.save_job(&job).await?;

        // 成败看重新查询的已持久化数量，而不是内存计数
        let captured = self.store.screen_count(&job.id).await?;
        if captured < self.config.min_screens {
            return Err(JobError::Pipeline(PipelineError::BelowMinimumScreens {
                captured,
                minimum: self.config.min_screens,
            })
            .into());
        }

        // ========== 阶段 6: 截图分析（尽力而为） ==========
        self.advance(&mut job, JobStatus::AnalyzingScreens).await?;
        match screen_analysis::analyze_all(
            self.store.clone(),
            self.generation.clone(),
            &self.config,
            &job.id,
        )
        .await
        {
            Ok(stats) => {
                self.store
                    .append_progress(
                        &job.id,
                        ProgressEntry::info(format!(
                            "截图分析完成: 成功 {} / 失败 {}",
                            stats.analyzed, stats.failed
                        )),
                    )
                    .await?;
            }
            Err(e) => {
                warn!("⚠️ [{}] 截图分析阶段出错，继续: {}", job.id, e);
                self.store
                    .append_progress(
                        &job.id,
                        ProgressEntry::error(format!("截图分析出错: {}", e)),
                    )
                    .await?;
            }
        }

        // ========== 阶段 7: 文档生成（致命） ==========
        self.advance(&mut job, JobStatus::GeneratingDocs).await?;
        self.generate_docs(&job, code_summary.as_deref(), prd_summary.as_deref())
            .await
            .map_err(|e| {
                JobError::Pipeline(PipelineError::DocGenerationFailed {
                    detail: e.to_string(),
                })
            })?;

        // ========== 完成 ==========
        job.status = JobStatus::Completed;
        job.completed_at = Some(Local::now());
        self.store.save_job(&job).await?;
        self.store
            .append_progress(&job.id, ProgressEntry::complete("任务完成"))
            .await?;
        log_job_complete(&job, captured);
        Ok(())
    }

    /// 推进阶段：先落库再开始该阶段的工作
    async fn advance(&self, job: &mut Job, status: JobStatus) -> Result<()> {
        job.status = status;
        if job.started_at.is_none() {
            job.started_at = Some(Local::now());
        }
        self.store.save_job(job).await?;
        self.store
            .append_progress(&job.id, ProgressEntry::info(format!("进入阶段: {}", status)))
            .await?;
        info!("📍 [{}] 阶段推进: {}", job.id, status);
        Ok(())
    }

    /// 不透明的摘要分析，失败时降级为空
    async fn opaque_analysis(&self, job: &Job, subject: &str) -> Option<String> {
        let prompt = format!(
            "请对目标应用 {} 的{}做摘要分析，返回要点列表。",
            job.app_url, subject
        );
        match self
            .generation
            .generate(&prompt, &[], GenOptions::default())
            .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("⚠️ [{}] {}分析失败，降级继续: {}", job.id, subject, e);
                None
            }
        }
    }

    /// 登录（如有凭据）并收集 / 探测路由
    ///
    /// 返回登录后的落地路由，供挑选引擎保护该路由不被剔除。
    async fn discover(&self, job: &mut Job) -> Result<Option<String>> {
        let discoverer = Discoverer::new(self.browser.as_ref(), &self.config);
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);

        let post_login_route = match (job.login_url.clone(), job.credentials.clone()) {
            (Some(login_url), Some(credentials)) => {
                if let Err(e) = discoverer.authenticate(&login_url, &credentials).await {
                    warn!("❌ [{}] 登录尝试耗尽: {}", job.id, e);
                    job.erase_credentials();
                    self.store.save_job(job).await?;
                    return Err(JobError::Auth(AuthError::Exhausted {
                        attempts: self.config.login_attempts,
                    })
                    .into());
                }
                let landing = self.browser.current_url().await?;
                Some(route_of(&landing))
            }
            _ => {
                self.browser.navigate(&job.app_url, nav_timeout).await?;
                None
            }
        };

        let nav_routes = discoverer.collect_routes().await?;
        job.discovered_routes = discoverer.probe_routes(&job.app_url, &nav_routes).await?;
        self.store.save_job(job).await?;
        self.store
            .append_progress(
                &job.id,
                ProgressEntry::info(format!(
                    "发现完成: {} 条路由",
                    job.discovered_routes.len()
                )),
            )
            .await?;
        Ok(post_login_route)
    }

    /// 在预算内挑选功能
    async fn plan_features(&self, job: &mut Job, post_login_route: Option<&str>) -> Result<()> {
        let candidates: Vec<DiscoveryResult> = job
            .discovered_routes
            .iter()
            .filter(|r| r.accessible && !r.error_page)
            .cloned()
            .collect();

        let params = self.config.budget_params();
        let max_features = budget::max_features(job.remaining_budget(), candidates.len(), &params);

        let selection = select_features(&SelectionInput {
            pages: &candidates,
            max_features,
            prescan: None,
            post_login_route,
            app_name: None,
        });

        let estimate = budget::estimate_for(selection.selected.len(), candidates.len(), &params);
        job.spent_cents += estimate.estimated_spend_cents;
        job.selected_features = selection.selected;
        job.additional_features = selection.additional;
        self.store.save_job(job).await?;

        if job.selected_features.is_empty() {
            warn!("⚠️ [{}] 没有挑出任何功能，继续（由最低截图数检查兜住）", job.id);
        }
        self.store
            .append_progress(
                &job.id,
                ProgressEntry::info(format!(
                    "挑选完成: 入选 {} / 候选 {} / 因预算裁掉 {}，预估花费 {} 分",
                    estimate.features_planned,
                    estimate.features_available,
                    estimate.features_cut_for_budget,
                    estimate.estimated_spend_cents
                )),
            )
            .await?;
        Ok(())
    }

    /// 逐功能爬取，单个功能失败不影响其他功能
    async fn crawl(&self, job: &mut Job) -> Result<()> {
        let flow = FeatureFlow::new(
            self.browser.as_ref(),
            self.generation.as_ref(),
            self.uploader.as_ref(),
            &self.config,
        );
        let mut state = CrawlState::new(&self.config);
        let total = job.selected_features.len();

        for (i, feature) in job.selected_features.iter().enumerate() {
            let ctx = FeatureCtx::new(job.id.clone(), i + 1, total);

            match flow.run(job, feature, &ctx, &mut state).await {
                Ok((outcome, records)) => {
                    let count = records.len();
                    for record in records {
                        if let Err(e) = self.store.insert_screen(record).await {
                            warn!("{} ⚠️ 截图记录落库失败: {}", ctx, e);
                        }
                    }
                    self.store
                        .append_progress(
                            &job.id,
                            ProgressEntry::info(format!(
                                "功能 {} 采集结束 ({:?})，落库 {} 张",
                                feature.name, outcome, count
                            )),
                        )
                        .await?;
                    if outcome == FlowOutcome::Skipped(crate::workflow::SkipReason::ScreenCapReached)
                    {
                        break;
                    }
                }
                Err(e) => {
                    error!("{} ❌ 功能 {} 采集出错: {}", ctx, feature.name, e);
                    self.store
                        .append_progress(
                            &job.id,
                            ProgressEntry::error(format!("功能 {} 采集出错: {}", feature.name, e)),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// 触发文档素材生成
    async fn generate_docs(
        &self,
        job: &Job,
        code_summary: Option<&str>,
        prd_summary: Option<&str>,
    ) -> Result<String> {
        let screens = self.store.list_screens(&job.id).await?;
        let screen_lines: String = screens
            .iter()
            .map(|s| format!("- [{}] {} → {}\n", s.feature_id, s.label, s.screenshot_ref))
            .collect();
        let features_json = serde_json::to_string(&job.selected_features)?;

        let prompt = format!(
            "请为应用 {} 生成功能文档素材大纲。\n\n\
             入选功能：\n{}\n\n已采集截图：\n{}\n\
             代码摘要：{}\n需求摘要：{}",
            job.app_url,
            features_json,
            screen_lines,
            code_summary.unwrap_or("（无）"),
            prd_summary.unwrap_or("（无）")
        );

        let text = self
            .generation
            .generate(
                &prompt,
                &[],
                GenOptions {
                    max_tokens: 2048,
                    temperature: 0.3,
                },
            )
            .await?;
        if text.trim().is_empty() {
            anyhow::bail!("文档生成返回内容为空");
        }

        self.store
            .append_progress(&job.id, ProgressEntry::complete("文档素材生成完成"))
            .await?;
        Ok(text)
    }
}

/// 从完整 URL 中取出路由路径
fn route_of(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    match without_scheme.find('/') {
        Some(pos) => {
            let path = &without_scheme[pos..];
            let path = path.split(['?', '#']).next().unwrap_or("/");
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        }
        None => "/".to_string(),
    }
}

// ========== 日志辅助函数 ==========

fn log_job_start(job: &Job) {
    info!("{}", "=".repeat(60));
    info!("🚀 任务启动: {}", job.id);
    info!("🎯 目标应用: {}", job.app_url);
    info!("💰 预算: {} 分 (已花费 {} 分)", job.budget_cents, job.spent_cents);
    info!("{}", "=".repeat(60));
}

fn log_job_complete(job: &Job, captured: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 任务完成统计: {}", job.id);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("✅ 入选功能: {}", job.selected_features.len());
    info!("📸 落库截图: {}", captured);
    info!("📦 附加功能: {}", job.additional_features.len());
    info!("{}", "=".repeat(60));
}
