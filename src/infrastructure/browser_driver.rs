//! 浏览器驱动 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露浏览器自动化能力：
//! 导航、自然语言操作、观察、截图、页内执行、读取当前 URL。
//!
//! 自然语言操作（act / observe）由 AI 解释执行，本身是非确定性的：
//! 每次调用都必须视为带超时的可失败外部操作，绝不当作确定性调用。

use std::time::Duration;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;

/// 一条观察结果
#[derive(Debug, Clone)]
pub struct Observation {
    pub description: String,
}

/// 浏览器自动化能力
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// 导航到指定 URL
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// 执行一条自然语言操作，失败时返回错误
    async fn act(&self, instruction: &str, timeout: Duration) -> Result<()>;

    /// 按自然语言查询观察页面
    async fn observe(&self, query: &str) -> Result<Vec<Observation>>;

    /// 截取当前页面
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// 在页面内执行 JS 并返回 JSON 结果
    async fn evaluate(&self, js: &str) -> Result<JsonValue>;

    /// 读取当前 URL
    async fn current_url(&self) -> Result<String>;
}

/// 基于 CDP 的浏览器驱动
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 自然语言指令先交给解释端点翻译成单条 JS，再页内执行
/// - 不认识 Feature / Job，不处理业务流程
pub struct CdpDriver {
    page: Page,
    interpreter: Client<OpenAIConfig>,
    model_name: String,
}

impl CdpDriver {
    /// 创建新的浏览器驱动
    pub fn new(page: Page, config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            page,
            interpreter: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 把自然语言指令翻译成单条可执行 JS
    async fn translate_instruction(&self, instruction: &str) -> Result<String> {
        let snapshot: String = self
            .page
            .evaluate(INTERACTIVE_SUMMARY_JS)
            .await?
            .into_value()?;

        let prompt = format!(
            "你是浏览器操作解释器。根据页面上的交互元素，把下面的指令翻译成一段\
             立即执行的 JavaScript（IIFE），只操作 DOM，不导航到外部站点。\n\
             只返回 JSON：{{\"js\": \"...\"}}，不要返回其他内容。\n\n\
             指令：{}\n\n页面交互元素摘要：\n{}",
            instruction, snapshot
        );

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![ChatCompletionRequestMessage::User(user_msg)])
            .temperature(0.0)
            .max_tokens(512u32)
            .build()?;

        let response = self.interpreter.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("指令解释返回内容为空"))?;

        let parsed = crate::services::generation::extract_json_object(&content)
            .ok_or_else(|| anyhow::anyhow!("指令解释结果不是合法 JSON: {}", content))?;
        let js = parsed
            .get("js")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("指令解释结果缺少 js 字段"))?;

        Ok(js.to_string())
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        debug!("导航到: {}", url);
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow::anyhow!("导航到 {} 超时 ({:?})", url, timeout))??;
        Ok(())
    }

    async fn act(&self, instruction: &str, timeout: Duration) -> Result<()> {
        debug!("执行操作: {}", instruction);
        let result = tokio::time::timeout(timeout, async {
            let js = self.translate_instruction(instruction).await?;
            self.page.evaluate(js).await?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow::anyhow!("操作 '{}' 超时 ({:?})", instruction, timeout))?;

        result.map_err(|e| {
            warn!("操作 '{}' 执行失败: {}", instruction, e);
            anyhow::anyhow!("操作 '{}' 执行失败: {}", instruction, e)
        })
    }

    async fn observe(&self, query: &str) -> Result<Vec<Observation>> {
        debug!("观察页面: {}", query);
        let js = format!(
            "{}({})",
            OBSERVE_MATCHES_JS,
            serde_json::to_string(query)?
        );
        let matches: Vec<String> = self.page.evaluate(js).await?.into_value()?;
        Ok(matches
            .into_iter()
            .map(|description| Observation { description })
            .collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(false)
                    .build(),
            )
            .await?;
        Ok(bytes)
    }

    async fn evaluate(&self, js: &str) -> Result<JsonValue> {
        let result = self.page.evaluate(js.to_string()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await?
            .ok_or_else(|| anyhow::anyhow!("无法读取当前 URL"))
    }
}

/// 采集页面交互元素摘要，供指令解释使用
const INTERACTIVE_SUMMARY_JS: &str = r#"
(() => {
    const parts = [];
    const nodes = document.querySelectorAll('a, button, input, select, textarea, [role="button"], [role="tab"]');
    let i = 0;
    for (const n of nodes) {
        if (i >= 80) break;
        const label = (n.innerText || n.value || n.getAttribute('aria-label') || n.getAttribute('placeholder') || '').trim().slice(0, 60);
        if (!label && n.tagName !== 'INPUT') continue;
        parts.push(`${n.tagName.toLowerCase()}[name=${n.getAttribute('name') || ''}][id=${n.id || ''}]: ${label}`);
        i++;
    }
    return parts.join('\n');
})()
"#;

/// 按查询词匹配页面上的交互元素描述
const OBSERVE_MATCHES_JS: &str = r#"
((query) => {
    const words = query.toLowerCase().split(/\s+/).filter(w => w.length > 1);
    const out = [];
    const nodes = document.querySelectorAll('a, button, input, select, [role="button"], [role="dialog"], h1, h2, h3');
    for (const n of nodes) {
        if (out.length >= 20) break;
        const text = (n.innerText || n.getAttribute('aria-label') || '').trim().slice(0, 100);
        if (!text) continue;
        const hay = text.toLowerCase();
        if (words.length === 0 || words.some(w => hay.includes(w))) {
            out.push(`${n.tagName.toLowerCase()}: ${text}`);
        }
    }
    return out;
})
"#;
