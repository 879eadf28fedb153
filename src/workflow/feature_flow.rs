//! 功能采集流程 - 流程层
//!
//! 核心职责：定义"一个功能"的完整两阶段采集流程
//!
//! 阶段顺序（显式状态机）：
//! 1. Navigate - 导航到功能路由（超时则退回侧边导航点击）
//! 2. HealthCheck - 会话失效检测（共享重新登录额度）+ 页面健康检查
//! 3. Hero - 主图采集（(URL, DOM 哈希) 去重）
//! 4. Explore - 页面理解 + 有限轻探
//! 5. Plan - 重拍新鲜主图，生成至多 2 个截图计划
//! 6. Execute - 逐计划执行操作、比较变化、落库追拍
//!
//! 浏览器操作与生成调用都是非确定性的：单个功能的任何失败都
//! 只影响这个功能的产出，绝不让整个任务中断。

use std::time::Duration;

use anyhow::Result;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::BrowserDriver;
use crate::models::{
    Feature, Job, PageUnderstanding, ScreenRecord, ScreenStatus, ScreenshotPlan,
};
use crate::services::capture_guard::{dom_hash, session_expired, CaptureGuard};
use crate::services::discovery::{join_url, Discoverer};
use crate::services::generation::{extract_json_array, extract_json_object, parse_yes_no};
use crate::services::{GenerationService, ScreenshotUploader};
use crate::workflow::feature_ctx::FeatureCtx;

/// 空白页判定的最小标记长度
const BLANK_MARKUP_LEN: usize = 30;
/// 字节前缀比较的长度
const BYTE_PREFIX_LEN: usize = 1024;

/// 功能采集结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// 主图 + 至少一张操作图
    Documented,
    /// 只保留主图
    HeroOnly,
    /// 整个功能被跳过
    Skipped(SkipReason),
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 错误页或空白页
    Unhealthy,
    /// 主图与已采集内容重复
    Duplicate,
    /// 会话失效且重新登录额度耗尽
    SessionLost,
    /// 全局截图上限已到
    ScreenCapReached,
}

/// 采集阶段
#[derive(Debug)]
enum CrawlPhase {
    Navigate,
    HealthCheck,
    Hero,
    Explore,
    Plan,
    Execute,
    Done(FlowOutcome),
}

/// 整个采集过程共享的状态
///
/// 去重守卫、重新登录额度、全局截图计数都跨功能共享。
#[derive(Debug)]
pub struct CrawlState {
    pub guard: CaptureGuard,
    pub reauth_remaining: usize,
    pub screens_captured: usize,
}

impl CrawlState {
    pub fn new(config: &Config) -> Self {
        Self {
            guard: CaptureGuard::new(),
            reauth_remaining: config.reauth_cap,
            screens_captured: 0,
        }
    }
}

/// 单个功能流程中逐阶段累积的数据
#[derive(Debug, Default)]
struct FlowData {
    url: String,
    markup: String,
    hero_png: Vec<u8>,
    understanding: Option<PageUnderstanding>,
    plans: Vec<ScreenshotPlan>,
    /// 本功能是否已经用掉一次重新登录
    reauthed: bool,
    order_index: usize,
}

/// 功能采集流程
///
/// - 编排单个功能的两阶段采集
/// - 不持有任何资源，只依赖基础设施与业务能力
pub struct FeatureFlow<'a> {
    browser: &'a dyn BrowserDriver,
    generation: &'a dyn GenerationService,
    uploader: &'a ScreenshotUploader,
    config: &'a Config,
}

impl<'a> FeatureFlow<'a> {
    /// 创建新的功能采集流程
    pub fn new(
        browser: &'a dyn BrowserDriver,
        generation: &'a dyn GenerationService,
        uploader: &'a ScreenshotUploader,
        config: &'a Config,
    ) -> Self {
        Self {
            browser,
            generation,
            uploader,
            config,
        }
    }

    /// 执行单个功能的完整采集流程
    ///
    /// 返回的记录由调用方负责落库。
    pub async fn run(
        &self,
        job: &Job,
        feature: &Feature,
        ctx: &FeatureCtx,
        state: &mut CrawlState,
    ) -> Result<(FlowOutcome, Vec<ScreenRecord>)> {
        let mut data = FlowData {
            url: join_url(&job.app_url, &feature.source_route),
            ..Default::default()
        };
        let mut records = Vec::new();
        let mut phase = CrawlPhase::Navigate;

        loop {
            phase = match phase {
                CrawlPhase::Navigate => self.navigate(feature, ctx, &mut data).await,
                CrawlPhase::HealthCheck => self.health_check(job, ctx, state, &mut data).await?,
                CrawlPhase::Hero => {
                    self.capture_hero(ctx, feature, state, &mut data, &mut records)
                        .await?
                }
                CrawlPhase::Explore => self.explore(ctx, feature, &mut data).await,
                CrawlPhase::Plan => self.plan(ctx, feature, &mut data).await,
                CrawlPhase::Execute => {
                    self.execute_plans(ctx, feature, state, &mut data, &mut records)
                        .await
                }
                CrawlPhase::Done(outcome) => {
                    log_outcome(ctx, feature, outcome, records.len());
                    return Ok((outcome, records));
                }
            };
        }
    }

    // ========== 阶段 1: 导航 ==========

    async fn navigate(&self, feature: &Feature, ctx: &FeatureCtx, data: &mut FlowData) -> CrawlPhase {
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);
        info!("{} 🧭 导航到 {}", ctx, data.url);

        if let Err(e) = self.browser.navigate(&data.url, nav_timeout).await {
            // 直接导航失败时退回侧边导航点击
            warn!("{} ⚠️ 直接导航失败: {}，尝试侧边导航", ctx, e);
            let act_timeout = Duration::from_secs(self.config.act_timeout_secs);
            let instruction = format!("点击侧边导航中的 {} 入口", feature.name);
            if let Err(e) = self.browser.act(&instruction, act_timeout).await {
                warn!("{} ❌ 侧边导航也失败: {}", ctx, e);
                return CrawlPhase::Done(FlowOutcome::Skipped(SkipReason::Unhealthy));
            }
        }

        self.dismiss_overlays(ctx).await;
        self.wait_for_loading().await;
        tokio::time::sleep(Duration::from_millis(self.config.settle_wait_ms)).await;
        CrawlPhase::HealthCheck
    }

    /// 关闭遮罩或弹窗，失败时退回 Escape 按键，全程尽力而为
    async fn dismiss_overlays(&self, ctx: &FeatureCtx) {
        let act_timeout = Duration::from_secs(self.config.act_timeout_secs);
        if self
            .browser
            .act("关闭页面上出现的弹窗、遮罩或引导提示", act_timeout)
            .await
            .is_err()
        {
            if let Err(e) = self.browser.evaluate(ESCAPE_KEY_JS).await {
                warn!("{} ⚠️ Escape 兜底也失败: {}", ctx, e);
            }
        }
    }

    /// 轮询等待加载指示器消失，超时则继续
    async fn wait_for_loading(&self) {
        let deadline = Duration::from_millis(self.config.loading_wait_ms);
        let poll = Duration::from_millis(self.config.loading_poll_ms.max(1));
        let start = tokio::time::Instant::now();

        while start.elapsed() < deadline {
            match self.browser.evaluate(LOADING_INDICATOR_JS).await {
                Ok(v) if v.as_bool() == Some(true) => tokio::time::sleep(poll).await,
                _ => return,
            }
        }
    }

    // ========== 阶段 2: 会话与健康检查 ==========

    async fn health_check(
        &self,
        job: &Job,
        ctx: &FeatureCtx,
        state: &mut CrawlState,
        data: &mut FlowData,
    ) -> Result<CrawlPhase> {
        let url = self.browser.current_url().await?;
        data.markup = self.page_markup().await?;

        if session_expired(&url, &data.markup) {
            return Ok(self.try_reauth(job, ctx, state, data).await);
        }

        // 错误页或空白页直接跳过
        let meta = self.browser.evaluate(PROBE_HEALTH_JS).await.unwrap_or(JsonValue::Null);
        let error_page = meta
            .get("errorPage")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if error_page || data.markup.trim().len() < BLANK_MARKUP_LEN {
            warn!("{} ⚠️ 页面不健康（错误页或空白页），跳过", ctx);
            return Ok(CrawlPhase::Done(FlowOutcome::Skipped(SkipReason::Unhealthy)));
        }

        Ok(CrawlPhase::Hero)
    }

    /// 会话失效时消耗共享额度重新登录
    async fn try_reauth(
        &self,
        job: &Job,
        ctx: &FeatureCtx,
        state: &mut CrawlState,
        data: &mut FlowData,
    ) -> CrawlPhase {
        if data.reauthed || state.reauth_remaining == 0 {
            warn!("{} ❌ 会话失效且重新登录额度已耗尽", ctx);
            return CrawlPhase::Done(FlowOutcome::Skipped(SkipReason::SessionLost));
        }
        let (login_url, credentials) = match (&job.login_url, &job.credentials) {
            (Some(l), Some(c)) => (l.clone(), c.clone()),
            _ => {
                warn!("{} ❌ 会话失效但没有可用凭据", ctx);
                return CrawlPhase::Done(FlowOutcome::Skipped(SkipReason::SessionLost));
            }
        };

        state.reauth_remaining -= 1;
        data.reauthed = true;
        info!(
            "{} 🔐 会话失效，重新登录（剩余额度 {}）",
            ctx, state.reauth_remaining
        );

        let discoverer = Discoverer::new(self.browser, self.config);
        match discoverer.authenticate(&login_url, &credentials).await {
            Ok(()) => CrawlPhase::Navigate,
            Err(e) => {
                warn!("{} ❌ 重新登录失败: {}", ctx, e);
                CrawlPhase::Done(FlowOutcome::Skipped(SkipReason::SessionLost))
            }
        }
    }

    // ========== 阶段 3: 主图 ==========

    async fn capture_hero(
        &self,
        ctx: &FeatureCtx,
        feature: &Feature,
        state: &mut CrawlState,
        data: &mut FlowData,
        records: &mut Vec<ScreenRecord>,
    ) -> Result<CrawlPhase> {
        if state.screens_captured >= self.config.max_screens_per_job {
            warn!("{} ⚠️ 全局截图上限已到，停止采集", ctx);
            return Ok(CrawlPhase::Done(FlowOutcome::Skipped(
                SkipReason::ScreenCapReached,
            )));
        }

        let url = self.browser.current_url().await?;
        let hash = dom_hash(&data.markup);
        if !state.guard.try_capture(&url, &hash) {
            info!("{} ⏭️ 主图与已采集内容重复，跳过", ctx);
            return Ok(CrawlPhase::Done(FlowOutcome::Skipped(SkipReason::Duplicate)));
        }

        data.hero_png = self.browser.screenshot().await?;
        let record = self
            .persist_screen(ctx, feature, data, ScreenRecord::hero_label(), &url)
            .await?;
        state.screens_captured += 1;
        records.push(record);
        info!("{} 📸 主图已采集", ctx);

        Ok(CrawlPhase::Explore)
    }

    // ========== 阶段 4: 探索 ==========

    async fn explore(&self, ctx: &FeatureCtx, feature: &Feature, data: &mut FlowData) -> CrawlPhase {
        let prompt = format!(
            "下面是功能 \"{}\" 的页面截图与标记摘要，请做页面理解。\n\
             返回 JSON 对象：{{\"purpose\": 页面用途, \"user_goals\": [1-4 条用户目标],\n\
             \"elements\": [{{\"description\": 元素描述, \"kind\": button|link|input|select|toggle|tab|menu|other,\n\
             \"probe\": 一条探测该元素的自然语言指令}}],\n\
             \"empty_state\": 是否空状态, \"empty_state_cta\": 空状态下的行动号召,\n\
             \"related_features\": [相关功能], \"complexity\": simple|moderate|complex}}。\n\n\
             页面标记摘要：\n{}",
            feature.name,
            truncate_chars(&data.markup, 4000)
        );

        let understanding = match self
            .generation
            .generate(&prompt, std::slice::from_ref(&data.hero_png), Default::default())
            .await
        {
            Ok(text) => match extract_json_object(&text) {
                Some(v) => parse_understanding(&v),
                None => {
                    warn!("{} ⚠️ 页面理解不是合法 JSON，使用兜底理解", ctx);
                    PageUnderstanding::fallback(&feature.source_route)
                }
            },
            Err(e) => {
                warn!("{} ⚠️ 页面理解调用失败: {}，使用兜底理解", ctx, e);
                PageUnderstanding::fallback(&feature.source_route)
            }
        };

        info!(
            "{} 🧠 页面理解完成: {} 个交互元素, 复杂度 {:?}",
            ctx,
            understanding.elements.len(),
            understanding.complexity
        );

        // 有限轻探：只碰值得探的元素，探完回到功能页
        self.probe_elements(ctx, &understanding, data).await;

        // 空状态时跟随一次行动号召
        if understanding.empty_state {
            if let Some(cta) = &understanding.empty_state_cta {
                info!("{} 👆 空状态，跟随行动号召: {}", ctx, cta);
                let act_timeout = Duration::from_secs(self.config.act_timeout_secs);
                if let Err(e) = self
                    .browser
                    .act(&format!("点击 {}", cta), act_timeout)
                    .await
                {
                    warn!("{} ⚠️ 行动号召点击失败: {}", ctx, e);
                }
                tokio::time::sleep(Duration::from_millis(self.config.settle_wait_ms)).await;
            }
        }

        let skip_document = understanding.skip_document_phase();
        data.understanding = Some(understanding);

        if skip_document {
            info!("{} ⏭️ 简单页面且无交互元素，只保留主图", ctx);
            return CrawlPhase::Done(FlowOutcome::HeroOnly);
        }
        CrawlPhase::Plan
    }

    /// 逐个轻探值得碰的交互元素，每次探完导航回功能页
    async fn probe_elements(
        &self,
        ctx: &FeatureCtx,
        understanding: &PageUnderstanding,
        data: &FlowData,
    ) {
        let act_timeout = Duration::from_secs(self.config.act_timeout_secs);
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);

        let worth_probing: Vec<_> = understanding
            .elements
            .iter()
            .filter(|e| e.kind.is_probe_worthy() && !e.probe.is_empty())
            .take(self.config.max_probe_elements)
            .collect();

        for element in worth_probing {
            if let Err(e) = self.browser.act(&element.probe, act_timeout).await {
                warn!("{} ⚠️ 轻探失败: {} ({})", ctx, element.description, e);
                continue;
            }
            tokio::time::sleep(Duration::from_millis(self.config.settle_wait_ms)).await;
            if let Err(e) = self.browser.navigate(&data.url, nav_timeout).await {
                warn!("{} ⚠️ 轻探后返回失败: {}", ctx, e);
                return;
            }
        }
    }

    // ========== 阶段 5: 截图计划 ==========

    async fn plan(&self, ctx: &FeatureCtx, feature: &Feature, data: &mut FlowData) -> CrawlPhase {
        // 探索可能改变了页面，重拍一张新鲜主图作为计划上下文
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);
        if self.browser.navigate(&data.url, nav_timeout).await.is_ok() {
            self.wait_for_loading().await;
        }
        let fresh = match self.browser.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!("{} ⚠️ 新鲜主图重拍失败: {}，只保留主图", ctx, e);
                return CrawlPhase::Done(FlowOutcome::HeroOnly);
            }
        };
        data.hero_png = fresh;

        let understanding_json = data
            .understanding
            .as_ref()
            .and_then(|u| serde_json::to_string(u).ok())
            .unwrap_or_default();

        let prompt = format!(
            "基于功能 \"{}\" 的页面理解与当前截图，生成至多 {} 个截图计划。\n\
             每个计划演示一条不同的用户路径，操作结束时页面状态必须与当前截图明显不同。\n\
             绝不计划不可逆的操作，也绝不计划会向外部发送内容的操作（删除、支付、发送消息等）。\n\
             返回 JSON 数组：\n\
             [{{\"description\": 计划描述, \"actions\": [有序的自然语言操作],\n\
             \"value\": 一句话教学价值, \"submit_after\": 是否提交, \"capture_result\": 提交后是否补拍结果图}}]。\n\n\
             页面理解：\n{}",
            feature.name, self.config.max_plans_per_feature, understanding_json
        );

        let plans = match self
            .generation
            .generate(&prompt, std::slice::from_ref(&data.hero_png), Default::default())
            .await
        {
            Ok(text) => extract_json_array(&text).map(|v| parse_plans(&v)).unwrap_or_default(),
            Err(e) => {
                warn!("{} ⚠️ 截图计划生成失败: {}", ctx, e);
                Vec::new()
            }
        };

        if plans.is_empty() {
            info!("{} ⏭️ 没有可执行的截图计划，只保留主图", ctx);
            return CrawlPhase::Done(FlowOutcome::HeroOnly);
        }

        data.plans = plans;
        data.plans.truncate(self.config.max_plans_per_feature);
        info!("{} 📋 生成 {} 个截图计划", ctx, data.plans.len());
        CrawlPhase::Execute
    }

    // ========== 阶段 6: 执行计划 ==========

    async fn execute_plans(
        &self,
        ctx: &FeatureCtx,
        feature: &Feature,
        state: &mut CrawlState,
        data: &mut FlowData,
        records: &mut Vec<ScreenRecord>,
    ) -> CrawlPhase {
        let act_timeout = Duration::from_secs(self.config.act_timeout_secs);
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);
        let mut vision_checks_remaining = self.config.vision_checks_per_feature;
        let mut documented = false;
        let plans = std::mem::take(&mut data.plans);

        'plans: for (n, plan) in plans.iter().enumerate() {
            let plan_no = n + 1;
            info!("{} ▶️ 执行计划 {}: {}", ctx, plan_no, plan.description);

            if state.screens_captured >= self.config.max_screens_per_job {
                warn!("{} ⚠️ 全局截图上限已到，停止执行计划", ctx);
                break;
            }

            // 每个计划都从干净的功能页出发，比较基线是新鲜主图
            if n > 0 {
                if let Err(e) = self.browser.navigate(&data.url, nav_timeout).await {
                    warn!("{} ⚠️ 计划 {} 前返回功能页失败: {}", ctx, plan_no, e);
                    continue;
                }
                self.wait_for_loading().await;
            }
            let baseline = &data.hero_png;

            for action in &plan.actions {
                if let Err(e) = self.browser.act(action, act_timeout).await {
                    warn!("{} ⚠️ 操作失败，放弃计划 {}: {}", ctx, plan_no, e);
                    continue 'plans;
                }
                tokio::time::sleep(Duration::from_millis(self.config.settle_wait_ms)).await;
            }
            self.wait_for_loading().await;

            let after = match self.browser.screenshot().await {
                Ok(png) => png,
                Err(e) => {
                    warn!("{} ⚠️ 操作后截图失败: {}", ctx, e);
                    continue;
                }
            };

            // 变化比较阶梯：字节差 → 视觉判断（限额）→ 字节前缀
            let changed = self
                .screenshot_changed(ctx, baseline, &after, &mut vision_checks_remaining)
                .await;
            if !changed {
                info!("{} ⏭️ 计划 {} 未造成可见变化，不落库", ctx, plan_no);
                continue;
            }

            if let Err(e) = self
                .record_followup(ctx, feature, state, data, &after, ScreenRecord::action_label(plan_no), records)
                .await
            {
                warn!("{} ⚠️ 操作图落库失败: {}", ctx, e);
                continue;
            }
            documented = true;

            // 提交与结果图
            if plan.submit_after {
                if let Err(e) = self.browser.act("点击提交按钮提交表单", act_timeout).await {
                    warn!("{} ⚠️ 提交失败: {}", ctx, e);
                    continue;
                }
                self.wait_for_loading().await;
                tokio::time::sleep(Duration::from_millis(self.config.settle_wait_ms)).await;

                if plan.capture_result && state.screens_captured < self.config.max_screens_per_job {
                    match self.browser.screenshot().await {
                        Ok(png) => {
                            // 结果图也走同一条比较阶梯，提交后没再变化就不补拍
                            let result_changed = self
                                .screenshot_changed(ctx, &after, &png, &mut vision_checks_remaining)
                                .await;
                            if !result_changed {
                                info!("{} ⏭️ 提交后页面未再变化，不补拍结果图", ctx);
                            } else if let Err(e) = self
                                .record_followup(
                                    ctx,
                                    feature,
                                    state,
                                    data,
                                    &png,
                                    ScreenRecord::result_label(plan_no),
                                    records,
                                )
                                .await
                            {
                                warn!("{} ⚠️ 结果图落库失败: {}", ctx, e);
                            }
                        }
                        Err(e) => warn!("{} ⚠️ 结果图截图失败: {}", ctx, e),
                    }
                }
            }
        }

        if documented {
            CrawlPhase::Done(FlowOutcome::Documented)
        } else {
            CrawlPhase::Done(FlowOutcome::HeroOnly)
        }
    }

    /// 判断两张截图之间是否发生了明显变化
    async fn screenshot_changed(
        &self,
        ctx: &FeatureCtx,
        before: &[u8],
        after: &[u8],
        vision_checks_remaining: &mut usize,
    ) -> bool {
        let delta = before.len().abs_diff(after.len());
        if delta > self.config.screenshot_delta_bytes {
            return true;
        }

        if *vision_checks_remaining > 0 {
            *vision_checks_remaining -= 1;
            let result = self
                .generation
                .generate(
                    "对比前后两张截图，页面内容是否发生了明显变化？只回答 yes 或 no。",
                    &[before.to_vec(), after.to_vec()],
                    Default::default(),
                )
                .await;
            match result {
                Ok(text) => return parse_yes_no(&text).unwrap_or(false),
                Err(e) => warn!("{} ⚠️ 视觉比较调用失败: {}", ctx, e),
            }
        }

        // 最后的兜底：比较字节前缀
        let prefix = before.len().min(after.len()).min(BYTE_PREFIX_LEN);
        before[..prefix] != after[..prefix]
    }

    /// 落库一张显式豁免的追拍
    async fn record_followup(
        &self,
        ctx: &FeatureCtx,
        feature: &Feature,
        state: &mut CrawlState,
        data: &mut FlowData,
        png: &[u8],
        label: String,
        records: &mut Vec<ScreenRecord>,
    ) -> Result<()> {
        let markup = self.page_markup().await.unwrap_or_default();
        state.guard.record_followup(&dom_hash(&markup));

        let url = self.browser.current_url().await?;
        let previous_markup = std::mem::replace(&mut data.markup, markup);
        let previous_png = std::mem::replace(&mut data.hero_png, png.to_vec());
        let result = self.persist_screen(ctx, feature, data, label, &url).await;
        data.markup = previous_markup;
        data.hero_png = previous_png;

        let record = result?;
        state.screens_captured += 1;
        records.push(record);
        Ok(())
    }

    /// 上传截图并构造持久化记录
    async fn persist_screen(
        &self,
        ctx: &FeatureCtx,
        feature: &Feature,
        data: &mut FlowData,
        label: String,
        url: &str,
    ) -> Result<ScreenRecord> {
        let upload_label = format!("{}-{}", feature.slug, label);
        let screenshot_ref = self
            .uploader
            .upload(&ctx.job_id, &upload_label, &data.hero_png)
            .await?;

        let order_index = data.order_index;
        data.order_index += 1;

        Ok(ScreenRecord {
            id: format!("{}/{}/{}", ctx.job_id, feature.id, label),
            url: url.to_string(),
            route: feature.source_route.clone(),
            nav_label: feature.name.clone(),
            screenshot_ref,
            markup: data.markup.clone(),
            code_context: None,
            screen_type: String::new(),
            feature_id: feature.id.clone(),
            label,
            order_index,
            status: ScreenStatus::Crawled,
        })
    }

    async fn page_markup(&self) -> Result<String> {
        let value = self.browser.evaluate(PAGE_MARKUP_SNAPSHOT_JS).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

// ========== 宽松解析辅助函数 ==========

/// 从生成结果构造页面理解，缺失字段一概用默认值
fn parse_understanding(v: &JsonValue) -> PageUnderstanding {
    use crate::models::understanding::{Complexity, ElementKind, InteractiveElement};

    let elements = v
        .get("elements")
        .and_then(|e| e.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let description = item.get("description")?.as_str()?.to_string();
                    Some(InteractiveElement {
                        description,
                        kind: ElementKind::parse_lenient(
                            item.get("kind").and_then(|k| k.as_str()).unwrap_or(""),
                        ),
                        probe: item
                            .get("probe")
                            .and_then(|p| p.as_str())
                            .unwrap_or("")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    PageUnderstanding {
        purpose: v
            .get("purpose")
            .and_then(|p| p.as_str())
            .unwrap_or("未知")
            .to_string(),
        user_goals: string_list(v.get("user_goals")),
        elements,
        empty_state: v
            .get("empty_state")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
        empty_state_cta: v
            .get("empty_state_cta")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string()),
        related_features: string_list(v.get("related_features")),
        complexity: Complexity::parse_lenient(
            v.get("complexity").and_then(|c| c.as_str()).unwrap_or(""),
        ),
    }
}

/// 从生成结果解析截图计划，解析不出的条目静默丢弃
fn parse_plans(v: &JsonValue) -> Vec<ScreenshotPlan> {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(v: Option<&JsonValue>) -> Vec<String> {
    v.and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ========== 日志辅助方法 ==========

fn log_outcome(ctx: &FeatureCtx, feature: &Feature, outcome: FlowOutcome, records: usize) {
    match outcome {
        FlowOutcome::Documented => {
            info!("{} ✓ 功能 {} 采集完成，共 {} 张截图", ctx, feature.name, records)
        }
        FlowOutcome::HeroOnly => {
            info!("{} ✓ 功能 {} 只保留主图", ctx, feature.name)
        }
        FlowOutcome::Skipped(reason) => {
            warn!("{} ⏭️ 功能 {} 被跳过: {:?}", ctx, feature.name, reason)
        }
    }
}

/// 页面健康探测（只看错误页标志）
const PROBE_HEALTH_JS: &str = r#"
(() => {
    const probePageMeta = () => {
        const text = ((document.body && document.body.innerText) || '').slice(0, 2000);
        return {
            errorPage:
                /(404|not found|页面不存在|access denied|forbidden|something went wrong)/i.test(text) ||
                /404|error/i.test(document.title),
        };
    };
    return probePageMeta();
})()
"#;

/// 加载指示器是否仍然可见
const LOADING_INDICATOR_JS: &str = r#"
(() => {
    const loadingIndicator = document.querySelector(
        '.loading, .spinner, [aria-busy="true"], [data-loading="true"]');
    return !!loadingIndicator;
})()
"#;

/// Escape 按键兜底，关闭模态弹窗
const ESCAPE_KEY_JS: &str = r#"
(() => {
    document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', bubbles: true }));
    return true;
})()
"#;

/// 读取完整页面标记
const PAGE_MARKUP_SNAPSHOT_JS: &str = "document.documentElement.outerHTML";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeBrowser, FakePage};
    use crate::models::feature::slugify;
    use crate::services::ScreenshotUploader;

    fn feature(route: &str, name: &str) -> Feature {
        Feature {
            id: format!("feat-{}", slugify(name)),
            name: name.to_string(),
            slug: slugify(name),
            description: String::new(),
            source_route: route.to_string(),
            has_form: false,
            priority: 1,
            sub_pages: Vec::new(),
        }
    }

    fn job() -> Job {
        Job::new("j1", "https://app.example.com", 5000)
    }

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.settle_wait_ms = 0;
        config.loading_wait_ms = 0;
        config
    }

    fn page(markup: &str) -> FakePage {
        FakePage::new(markup)
    }

    fn rich_markup(text: &str) -> String {
        format!(
            "<html><body><main><h1>{}</h1><p>content content content</p></main></body></html>",
            text
        )
    }

    #[tokio::test]
    async fn test_simple_page_never_asks_for_plans() {
        let browser = FakeBrowser::new("https://app.example.com");
        browser.add_page(
            "https://app.example.com/about",
            page(&rich_markup("About")),
        );
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_understanding(
            r#"{"purpose": "关于页", "user_goals": [], "elements": [],
                "empty_state": false, "related_features": [], "complexity": "simple"}"#,
        );
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(&job(), &feature("/about", "About"), &ctx, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome, FlowOutcome::HeroOnly);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "hero");
        // 简单页面绝不触发截图计划生成
        assert_eq!(generation.plan_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_hero_is_skipped() {
        let browser = FakeBrowser::new("https://app.example.com");
        let markup = rich_markup("Same content");
        browser.add_page("https://app.example.com/a", page(&markup));
        browser.add_page("https://app.example.com/b", page(&markup));
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_understanding(
            r#"{"purpose": "x", "user_goals": [], "elements": [],
                "empty_state": false, "related_features": [], "complexity": "simple"}"#,
        );
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 2);
        let (first, _) = flow
            .run(&job(), &feature("/a", "Alpha"), &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(first, FlowOutcome::HeroOnly);

        // 第二个功能内容相同（DOM 哈希重复），整个功能被跳过
        let (second, records) = flow
            .run(&job(), &feature("/b", "Beta"), &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(second, FlowOutcome::Skipped(SkipReason::Duplicate));
        assert!(records.is_empty());
    }

    fn login_markup() -> &'static str {
        r#"<html><body><form action="/login">
            <input name="email" type="email">
            <input name="password" type="password">
            <button>Sign in</button></form></body></html>"#
    }

    fn job_with_credentials() -> Job {
        let mut job = job();
        job.login_url = Some("https://app.example.com/login".into());
        job.credentials = Some(crate::models::Credentials {
            username: "demo@example.com".into(),
            password: "secret".into(),
        });
        job
    }

    #[tokio::test]
    async fn test_navigation_and_fallback_both_failing_skips_feature() {
        let browser = FakeBrowser::new("https://app.example.com");
        browser.fail_navigation("https://app.example.com/settings");
        browser.fail_act_containing("侧边导航");

        let generation = crate::fakes::FakeGeneration::new();
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(&job(), &feature("/settings", "Settings"), &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome, FlowOutcome::Skipped(SkipReason::Unhealthy));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_session_lost_reauths_once_then_recovers() {
        let browser = FakeBrowser::new("https://app.example.com");
        browser.add_page("https://app.example.com/login", page(login_markup()));
        browser.add_page(
            "https://app.example.com/settings",
            page(&rich_markup("Settings")),
        );
        // 第一次访问被会话保护重定向到登录页，重新登录后直达
        browser.redirect_once(
            "https://app.example.com/settings",
            "https://app.example.com/login",
        );
        browser.set_login("https://app.example.com/dashboard", 0);
        browser.add_page(
            "https://app.example.com/dashboard",
            page(&rich_markup("Dashboard")),
        );

        let generation = crate::fakes::FakeGeneration::new();
        generation.set_understanding(
            r#"{"purpose": "设置", "user_goals": [], "elements": [],
                "empty_state": false, "related_features": [], "complexity": "simple"}"#,
        );
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(
                &job_with_credentials(),
                &feature("/settings", "Settings"),
                &ctx,
                &mut state,
            )
            .await
            .unwrap();

        assert_eq!(outcome, FlowOutcome::HeroOnly);
        assert_eq!(records.len(), 1);
        // 恰好消耗一次共享额度
        assert_eq!(state.reauth_remaining, config.reauth_cap - 1);
    }

    #[tokio::test]
    async fn test_session_lost_without_budget_is_skipped() {
        let browser = FakeBrowser::new("https://app.example.com");
        browser.add_page("https://app.example.com/login", page(login_markup()));
        browser.redirect(
            "https://app.example.com/settings",
            "https://app.example.com/login",
        );

        let generation = crate::fakes::FakeGeneration::new();
        let uploader = ScreenshotUploader::new("");
        let mut config = quiet_config();
        config.reauth_cap = 0;
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(
                &job_with_credentials(),
                &feature("/settings", "Settings"),
                &ctx,
                &mut state,
            )
            .await
            .unwrap();
        assert_eq!(outcome, FlowOutcome::Skipped(SkipReason::SessionLost));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_plan_with_byte_delta_change_documents_feature() {
        let browser = FakeBrowser::new("https://app.example.com");
        // 截图序列：主图 / 新鲜主图 / 操作后（字节差超过阈值）
        browser.add_page(
            "https://app.example.com/orders",
            page(&rich_markup("Orders")).with_screenshots(vec![
                vec![0u8; 1000],
                vec![0u8; 1000],
                vec![1u8; 9000],
            ]),
        );
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_understanding(
            r#"{"purpose": "订单", "user_goals": ["查看订单"],
                "elements": [{"description": "新建按钮", "kind": "button", "probe": "点击新建按钮"}],
                "empty_state": false, "related_features": [], "complexity": "moderate"}"#,
        );
        generation.set_plans(
            r#"[{"description": "打开新建订单弹窗", "actions": ["点击新建订单按钮"],
                "value": "展示建单入口", "submit_after": false, "capture_result": false}]"#,
        );
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(&job(), &feature("/orders", "Orders"), &ctx, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome, FlowOutcome::Documented);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label, "hero");
        assert_eq!(records[1].label, "action-1");
        assert_eq!(records[1].id, "j1/feat-orders/action-1");
        // 字节差已超阈值，不需要动用视觉比较额度
        assert_eq!(generation.vision_calls(), 0);
        // 计划提示词带着页面理解上下文，仍然走计划分支
        assert_eq!(generation.plan_calls(), 1);
        // 计划提示词必须声明安全与可见性约束
        let prompts = generation.prompts();
        assert!(prompts.iter().any(|p| p.contains("不可逆")));
        assert!(prompts.iter().any(|p| p.contains("明显不同")));
    }

    #[tokio::test]
    async fn test_submit_result_captured_when_page_changes_again() {
        let browser = FakeBrowser::new("https://app.example.com");
        // 截图序列：主图 / 新鲜主图 / 操作后 / 提交后（每步字节差都超阈值）
        browser.add_page(
            "https://app.example.com/orders",
            page(&rich_markup("Orders")).with_screenshots(vec![
                vec![0u8; 1000],
                vec![0u8; 1000],
                vec![1u8; 9000],
                vec![2u8; 20000],
            ]),
        );
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_plans(
            r#"[{"description": "提交新订单表单", "actions": ["填写订单备注"],
                "value": "展示建单流程", "submit_after": true, "capture_result": true}]"#,
        );
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(&job(), &feature("/orders", "Orders"), &ctx, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome, FlowOutcome::Documented);
        let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["hero", "action-1", "result-1"]);
    }

    #[tokio::test]
    async fn test_submit_result_not_persisted_when_unchanged() {
        let browser = FakeBrowser::new("https://app.example.com");
        // 提交后截图与操作图完全相同，结果图不应落库
        browser.add_page(
            "https://app.example.com/orders",
            page(&rich_markup("Orders")).with_screenshots(vec![
                vec![0u8; 1000],
                vec![0u8; 1000],
                vec![1u8; 9000],
            ]),
        );
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_plans(
            r#"[{"description": "提交新订单表单", "actions": ["填写订单备注"],
                "value": "展示建单流程", "submit_after": true, "capture_result": true}]"#,
        );
        generation.set_change_answer("no");
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(&job(), &feature("/orders", "Orders"), &ctx, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome, FlowOutcome::Documented);
        let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["hero", "action-1"]);
        // 操作图靠字节差判定，结果图消耗一次视觉比较额度
        assert_eq!(generation.vision_calls(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_screenshot_is_not_persisted() {
        let browser = FakeBrowser::new("https://app.example.com");
        // 所有截图完全相同：字节差为 0，视觉判断回答 no
        browser.add_page(
            "https://app.example.com/orders",
            page(&rich_markup("Orders")),
        );
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_plans(
            r#"[{"description": "点一下", "actions": ["点击某个按钮"],
                "value": "", "submit_after": false, "capture_result": false}]"#,
        );
        generation.set_change_answer("no");
        let uploader = ScreenshotUploader::new("");
        let config = quiet_config();
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, records) = flow
            .run(&job(), &feature("/orders", "Orders"), &ctx, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome, FlowOutcome::HeroOnly);
        assert_eq!(records.len(), 1);
        assert_eq!(generation.vision_calls(), 1);
    }

    #[tokio::test]
    async fn test_vision_checks_are_capped_then_prefix_decides() {
        let browser = FakeBrowser::new("https://app.example.com");
        browser.add_page(
            "https://app.example.com/orders",
            page(&rich_markup("Orders")),
        );
        let generation = crate::fakes::FakeGeneration::new();
        generation.set_plans(
            r#"[{"description": "a", "actions": ["操作一"], "value": "", "submit_after": false, "capture_result": false},
                {"description": "b", "actions": ["操作二"], "value": "", "submit_after": false, "capture_result": false}]"#,
        );
        generation.set_change_answer("no");
        let uploader = ScreenshotUploader::new("");
        let mut config = quiet_config();
        config.vision_checks_per_feature = 1;
        let flow = FeatureFlow::new(&browser, &generation, &uploader, &config);

        let mut state = CrawlState::new(&config);
        let ctx = FeatureCtx::new("j1".into(), 1, 1);
        let (outcome, _) = flow
            .run(&job(), &feature("/orders", "Orders"), &ctx, &mut state)
            .await
            .unwrap();

        // 第一个计划用掉唯一的视觉额度，第二个计划落到字节前缀比较
        assert_eq!(outcome, FlowOutcome::HeroOnly);
        assert_eq!(generation.vision_calls(), 1);
    }

    #[test]
    fn test_parse_understanding_lenient() {
        let v = serde_json::json!({
            "purpose": "设置页",
            "elements": [
                {"description": "保存", "kind": "Button", "probe": "点击保存"},
                {"kind": "button"}
            ],
            "complexity": "Complex"
        });
        let u = parse_understanding(&v);
        assert_eq!(u.purpose, "设置页");
        // 缺 description 的元素被丢弃
        assert_eq!(u.elements.len(), 1);
        assert_eq!(
            u.complexity,
            crate::models::understanding::Complexity::Complex
        );
        assert!(!u.empty_state);
    }

    #[test]
    fn test_parse_plans_drops_malformed_entries() {
        let v = serde_json::json!([
            {"description": "ok", "actions": ["点击"]},
            {"actions": "不是数组"},
            42
        ]);
        let plans = parse_plans(&v);
        assert_eq!(plans.len(), 1);
        assert!(!plans[0].submit_after);
    }
}
