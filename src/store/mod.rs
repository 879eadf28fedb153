//! 持久化任务存储 - 外部协作方的接口
//!
//! 真正的持久层在系统之外；这里只定义接口，并提供一个
//! 内存实现供测试与本地运行使用。每次写入都指向唯一的记录，
//! 并发分析阶段不存在写冲突。

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{Job, ProgressEntry, ScreenRecord, ScreenStatus};

/// 任务存储接口
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 读取任务
    async fn load_job(&self, id: &str) -> Result<Job>;

    /// 整行写回任务
    async fn save_job(&self, job: &Job) -> Result<()>;

    /// 追加一条进度日志
    async fn append_progress(&self, job_id: &str, entry: ProgressEntry) -> Result<()>;

    /// 插入一条截图记录
    async fn insert_screen(&self, record: ScreenRecord) -> Result<()>;

    /// 统计某任务已持久化的截图数量
    async fn screen_count(&self, job_id: &str) -> Result<usize>;

    /// 列出某任务的全部截图记录
    async fn list_screens(&self, job_id: &str) -> Result<Vec<ScreenRecord>>;

    /// 更新截图记录的分析结果与状态
    async fn update_screen_analysis(
        &self,
        screen_id: &str,
        screen_type: Option<String>,
        status: ScreenStatus,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    jobs: HashMap<String, Job>,
    progress: HashMap<String, Vec<ProgressEntry>>,
    screens: Vec<ScreenRecord>,
}

/// 内存存储实现
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个任务（测试与 CLI 模式使用）
    pub async fn seed_job(&self, job: Job) {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id.clone(), job);
    }

    /// 读取某任务的进度日志
    pub async fn progress_log(&self, job_id: &str) -> Vec<ProgressEntry> {
        let inner = self.inner.lock().await;
        inner.progress.get(job_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load_job(&self, id: &str) -> Result<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", id))
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn append_progress(&self, job_id: &str, entry: ProgressEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .progress
            .entry(job_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn insert_screen(&self, record: ScreenRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.screens.push(record);
        Ok(())
    }

    async fn screen_count(&self, job_id: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner
            .screens
            .iter()
            .filter(|s| screen_belongs_to(s, job_id))
            .count())
    }

    async fn list_screens(&self, job_id: &str) -> Result<Vec<ScreenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .screens
            .iter()
            .filter(|s| screen_belongs_to(s, job_id))
            .cloned()
            .collect())
    }

    async fn update_screen_analysis(
        &self,
        screen_id: &str,
        screen_type: Option<String>,
        status: ScreenStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let screen = inner
            .screens
            .iter_mut()
            .find(|s| s.id == screen_id)
            .ok_or_else(|| anyhow::anyhow!("截图记录不存在: {}", screen_id))?;
        if let Some(t) = screen_type {
            screen.screen_type = t;
        }
        screen.status = status;
        Ok(())
    }
}

fn screen_belongs_to(record: &ScreenRecord, job_id: &str) -> bool {
    record.id.starts_with(&format!("{}/", job_id))
}
