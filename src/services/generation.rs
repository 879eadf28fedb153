//! 内容生成服务 - 业务能力层
//!
//! 只负责"内容生成"能力，不关心流程。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务
//!
//! 调用方约定：返回内容预期是 JSON 形状，但解析失败必须视为
//! 可恢复错误并落到文档化的兜底值，绝不因此中断流水线。

use std::time::Duration;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;

/// 单次生成调用的选项
#[derive(Debug, Clone, Copy)]
pub struct GenOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

/// 内容生成能力
///
/// 每次调用都是可失败的外部操作；图片以 PNG 字节传入（0、1 或 2 张）。
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
        opts: GenOptions,
    ) -> Result<String>;
}

/// 基于 OpenAI 兼容端点的生成服务
pub struct OpenAiGeneration {
    client: Client<OpenAIConfig>,
    model_name: String,
    request_timeout: Duration,
}

impl OpenAiGeneration {
    /// 创建新的生成服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            request_timeout: Duration::from_secs(config.gen_timeout_secs),
        }
    }
}

#[async_trait]
impl GenerationService for OpenAiGeneration {
    async fn generate(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
        opts: GenOptions,
    ) -> Result<String> {
        debug!("调用生成服务，模型: {}", self.model_name);
        debug!("提示词长度: {} 字符, 图片: {} 张", prompt.len(), images.len());

        // 构建用户消息内容（支持图片）
        let user_msg = if images.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
        } else {
            let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();

            content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: prompt.to_string(),
                },
            ));

            // 图片以 data URL 形式内联
            for png in images {
                let data_url = format!("data:image/png;base64,{}", BASE64.encode(png));
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: data_url,
                            detail: Some(ImageDetail::Auto),
                        },
                    },
                ));
            }

            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()?
        };

        let messages = vec![ChatCompletionRequestMessage::User(user_msg)];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(opts.temperature)
            .max_tokens(opts.max_tokens)
            .build()?;

        // 单次调用设置上限，悬死的请求不能拖垮整条流水线
        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                warn!("生成服务调用超时 ({} 秒)", self.request_timeout.as_secs());
                anyhow::anyhow!("生成服务调用超时 ({} 秒)", self.request_timeout.as_secs())
            })?
            .map_err(|e| {
                warn!("生成服务调用失败: {}", e);
                anyhow::anyhow!("生成服务调用失败: {}", e)
            })?;

        debug!("生成服务调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("生成服务返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

// ========== 宽松解析辅助函数 ==========

/// 从生成结果中提取 JSON 对象
///
/// 容忍 Markdown 代码围栏和前后的解释性文字，
/// 找不到合法对象时返回 None，由调用方落到兜底值。
pub fn extract_json_object(text: &str) -> Option<JsonValue> {
    extract_json_between(text, '{', '}')
}

/// 从生成结果中提取 JSON 数组
pub fn extract_json_array(text: &str) -> Option<JsonValue> {
    extract_json_between(text, '[', ']')
}

fn extract_json_between(text: &str, open: char, close: char) -> Option<JsonValue> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    let candidate = &text[start..=end];
    match serde_json::from_str(candidate) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("无法解析生成结果中的 JSON: {}", e);
            None
        }
    }
}

/// 从生成结果中解析 yes / no 判断
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let t = text.trim().to_lowercase();
    if t.starts_with("yes") || t.starts_with("是") {
        Some(true)
    } else if t.starts_with("no") || t.starts_with("否") {
        Some(false)
    } else if t.contains("yes") && !t.contains("no") {
        Some(true)
    } else if t.contains("no") && !t.contains("yes") {
        Some(false)
    } else {
        None
    }
}
