//! 截图上传服务 - 业务能力层
//!
//! 只负责"上传一张截图"能力；上传失败延迟后重试一次，
//! 仍失败则作为可恢复错误交还调用方。

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 重试前的等待时间
const RETRY_DELAY: Duration = Duration::from_millis(800);

/// 截图上传服务
pub struct ScreenshotUploader {
    client: reqwest::Client,
    base_url: String,
}

impl ScreenshotUploader {
    /// 创建新的上传服务
    ///
    /// `base_url` 为空时进入本地模式：不发起网络请求，只生成引用。
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// 上传一张 PNG 截图，返回截图引用
    ///
    /// 失败后等待一小段时间重试一次，两次都失败才报错。
    pub async fn upload(&self, job_id: &str, label: &str, png: &[u8]) -> Result<String> {
        if self.base_url.is_empty() {
            // 本地模式只生成稳定引用
            return Ok(format!("local://{}/{}.png", job_id, label));
        }

        match self.try_upload(job_id, label, png).await {
            Ok(reference) => Ok(reference),
            Err(first) => {
                warn!("截图 {} 上传失败: {}，等待后重试一次", label, first);
                sleep(RETRY_DELAY).await;
                self.try_upload(job_id, label, png)
                    .await
                    .map_err(|e| anyhow::anyhow!("截图 {} 重试上传仍失败: {}", label, e))
            }
        }
    }

    async fn try_upload(&self, job_id: &str, label: &str, png: &[u8]) -> Result<String> {
        let url = format!(
            "{}/screenshots/{}/{}.png",
            self.base_url.trim_end_matches('/'),
            job_id,
            label
        );
        debug!("上传截图: {} ({} 字节)", url, png.len());

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "image/png")
            .body(png.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("上传接口返回 {}", response.status());
        }

        Ok(url)
    }
}
