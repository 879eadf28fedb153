//! 测试替身
//!
//! 浏览器与生成服务都是非确定性的外部依赖，单元测试里用脚本化的
//! 替身代替：浏览器替身按 JS 片段中的标记分发固定结果，生成服务
//! 替身按提示词中的标记返回预置回答并记录调用次数。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::infrastructure::{BrowserDriver, Observation};
use crate::services::generation::{GenOptions, GenerationService};

// ========== 浏览器替身 ==========

/// 一个脚本化的页面
#[derive(Debug, Clone)]
pub struct FakePage {
    /// 页面标记快照
    pub markup: String,
    /// 导航路由列表 (route, label)
    pub routes: Vec<(String, String)>,
    /// 元信息探测结果
    pub meta: JsonValue,
    /// 观察结果
    pub observations: Vec<String>,
    /// 截图序列（逐次取出，取完后重复最后一张）
    pub screenshots: VecDeque<Vec<u8>>,
    /// 加载指示器还会命中的轮询次数
    pub loading_polls: usize,
}

impl FakePage {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            routes: Vec::new(),
            meta: json!({
                "title": "", "errorPage": false, "hasForm": false, "hasTable": false
            }),
            observations: Vec::new(),
            screenshots: VecDeque::from(vec![vec![0u8; 1000]]),
            loading_polls: 0,
        }
    }

    /// 设置截图序列
    pub fn with_screenshots(mut self, shots: Vec<Vec<u8>>) -> Self {
        self.screenshots = shots.into();
        self
    }
}

#[derive(Debug, Default)]
struct BrowserInner {
    current: String,
    pages: HashMap<String, FakePage>,
    act_log: Vec<String>,
    failing_navs: HashSet<String>,
    /// 导航重定向 (from → (to, 是否只生效一次))
    redirects: HashMap<String, (String, bool)>,
    failing_act_substrings: Vec<String>,
    /// 还需失败几次登录提交才放行
    login_failures_remaining: usize,
    post_login_url: Option<String>,
}

/// 脚本化浏览器
#[derive(Debug, Default)]
pub struct FakeBrowser {
    inner: Mutex<BrowserInner>,
}

impl FakeBrowser {
    pub fn new(origin: impl Into<String>) -> Self {
        let browser = Self::default();
        browser.inner.lock().unwrap().current = origin.into();
        browser
    }

    pub fn add_page(&self, url: impl Into<String>, page: FakePage) {
        self.inner.lock().unwrap().pages.insert(url.into(), page);
    }

    /// 配置登录行为：前 `failures` 次提交停留在登录页，之后跳到 `post_login_url`
    pub fn set_login(&self, post_login_url: impl Into<String>, failures: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.post_login_url = Some(post_login_url.into());
        inner.login_failures_remaining = failures;
    }

    /// 让指定 URL 的导航失败
    pub fn fail_navigation(&self, url: impl Into<String>) {
        self.inner.lock().unwrap().failing_navs.insert(url.into());
    }

    /// 让指定 URL 的导航被重定向（如登录保护页）
    pub fn redirect(&self, from: impl Into<String>, to: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .redirects
            .insert(from.into(), (to.into(), false));
    }

    /// 只重定向一次，之后恢复直达
    pub fn redirect_once(&self, from: impl Into<String>, to: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .redirects
            .insert(from.into(), (to.into(), true));
    }

    /// 让包含指定片段的操作失败
    pub fn fail_act_containing(&self, substring: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .failing_act_substrings
            .push(substring.into());
    }

    pub async fn current(&self) -> String {
        self.inner.lock().unwrap().current.clone()
    }

    pub async fn act_count(&self) -> usize {
        self.inner.lock().unwrap().act_log.len()
    }

    pub async fn act_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().act_log.clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_navs.contains(url) {
            return Err(anyhow::anyhow!("导航到 {} 失败", url));
        }
        if let Some((target, once)) = inner.redirects.get(url).cloned() {
            if once {
                inner.redirects.remove(url);
            }
            inner.current = target;
            return Ok(());
        }
        inner.current = url.to_string();
        Ok(())
    }

    async fn act(&self, instruction: &str, _timeout: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.act_log.push(instruction.to_string());

        if inner
            .failing_act_substrings
            .iter()
            .any(|s| instruction.contains(s.as_str()))
        {
            return Err(anyhow::anyhow!("操作 '{}' 执行失败", instruction));
        }

        // 登录提交：按配置决定放行或停留
        if instruction.contains("提交按钮完成登录") {
            if inner.login_failures_remaining > 0 {
                inner.login_failures_remaining -= 1;
            } else if let Some(post) = inner.post_login_url.clone() {
                inner.current = post;
            }
        }
        Ok(())
    }

    async fn observe(&self, _query: &str) -> Result<Vec<Observation>> {
        let inner = self.inner.lock().unwrap();
        let observations = inner
            .pages
            .get(&inner.current)
            .map(|p| p.observations.clone())
            .unwrap_or_default();
        Ok(observations
            .into_iter()
            .map(|description| Observation { description })
            .collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.current.clone();
        let page = inner
            .pages
            .get_mut(&current)
            .ok_or_else(|| anyhow::anyhow!("页面未脚本化: {}", current))?;
        if page.screenshots.len() > 1 {
            Ok(page.screenshots.pop_front().unwrap_or_default())
        } else {
            Ok(page.screenshots.front().cloned().unwrap_or_default())
        }
    }

    async fn evaluate(&self, js: &str) -> Result<JsonValue> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.current.clone();

        if js.contains("collectNavRoutes") {
            let routes = inner
                .pages
                .get(&current)
                .map(|p| p.routes.clone())
                .unwrap_or_default();
            let items: Vec<JsonValue> = routes
                .into_iter()
                .map(|(route, label)| json!({ "route": route, "label": label }))
                .collect();
            return Ok(JsonValue::Array(items));
        }
        if js.contains("probePageMeta") {
            return Ok(inner
                .pages
                .get(&current)
                .map(|p| p.meta.clone())
                .unwrap_or_else(|| json!({})));
        }
        if js.contains("outerHTML") {
            let markup = inner
                .pages
                .get(&current)
                .map(|p| p.markup.clone())
                .unwrap_or_default();
            return Ok(JsonValue::String(markup));
        }
        if js.contains("loadingIndicator") {
            if let Some(page) = inner.pages.get_mut(&current) {
                if page.loading_polls > 0 {
                    page.loading_polls -= 1;
                    return Ok(JsonValue::Bool(true));
                }
            }
            return Ok(JsonValue::Bool(false));
        }
        Ok(JsonValue::Null)
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.inner.lock().unwrap().current.clone())
    }
}

// ========== 生成服务替身 ==========

#[derive(Debug)]
struct GenInner {
    understanding: String,
    plans: String,
    change_answer: String,
    generic: String,
    failing_prompt_substrings: Vec<String>,
    prompts: Vec<String>,
    plan_calls: usize,
    vision_calls: usize,
}

/// 脚本化生成服务
///
/// 按提示词中的标记分发预置回答：
/// - 含"截图计划" → 计划数组 JSON（并计数，优先于"页面理解"）
/// - 含"页面理解" → 页面理解 JSON
/// - 含"明显变化" → yes / no 回答（带图时计入视觉比较次数）
/// - 其余 → 通用回答
#[derive(Debug)]
pub struct FakeGeneration {
    inner: Mutex<GenInner>,
}

impl Default for FakeGeneration {
    fn default() -> Self {
        Self {
            inner: Mutex::new(GenInner {
                understanding: json!({
                    "purpose": "测试页面",
                    "user_goals": ["完成测试"],
                    "elements": [],
                    "empty_state": false,
                    "related_features": [],
                    "complexity": "moderate"
                })
                .to_string(),
                plans: "[]".to_string(),
                change_answer: "yes".to_string(),
                generic: "ok".to_string(),
                failing_prompt_substrings: Vec::new(),
                prompts: Vec::new(),
                plan_calls: 0,
                vision_calls: 0,
            }),
        }
    }
}

impl FakeGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_understanding(&self, json_text: impl Into<String>) {
        self.inner.lock().unwrap().understanding = json_text.into();
    }

    pub fn set_plans(&self, json_text: impl Into<String>) {
        self.inner.lock().unwrap().plans = json_text.into();
    }

    pub fn set_change_answer(&self, answer: impl Into<String>) {
        self.inner.lock().unwrap().change_answer = answer.into();
    }

    pub fn set_generic(&self, text: impl Into<String>) {
        self.inner.lock().unwrap().generic = text.into();
    }

    /// 让包含指定片段的提示词调用失败
    pub fn fail_prompt_containing(&self, substring: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .failing_prompt_substrings
            .push(substring.into());
    }

    /// 截图计划提示词被调用的次数
    pub fn plan_calls(&self) -> usize {
        self.inner.lock().unwrap().plan_calls
    }

    /// 带图的变化判断调用次数
    pub fn vision_calls(&self) -> usize {
        self.inner.lock().unwrap().vision_calls
    }

    pub fn prompts(&self) -> Vec<String> {
        self.inner.lock().unwrap().prompts.clone()
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn generate(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
        _opts: GenOptions,
    ) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.prompts.push(prompt.chars().take(120).collect());

        if inner
            .failing_prompt_substrings
            .iter()
            .any(|s| prompt.contains(s.as_str()))
        {
            return Err(anyhow::anyhow!("生成服务调用失败"));
        }

        // 计划提示词把页面理解 JSON 作为上下文带在正文里，必须先于"页面理解"判断
        if prompt.contains("截图计划") {
            inner.plan_calls += 1;
            return Ok(inner.plans.clone());
        }
        if prompt.contains("页面理解") {
            return Ok(inner.understanding.clone());
        }
        if prompt.contains("明显变化") {
            if !images.is_empty() {
                inner.vision_calls += 1;
            }
            return Ok(inner.change_answer.clone());
        }
        Ok(inner.generic.clone())
    }
}
