//! 截图批量分析器 - 编排层
//!
//! 对已采集的截图做分类分析：分批处理，批内用信号量控制并发，
//! 每批完成后再开始下一批。单张截图分析失败只把该记录标为失败，
//! 整个阶段永远尽力而为。

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{ScreenRecord, ScreenStatus};
use crate::services::generation::{extract_json_object, GenOptions};
use crate::services::GenerationService;
use crate::store::JobStore;

/// 分析阶段统计
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalysisStats {
    pub analyzed: usize,
    pub failed: usize,
}

/// 分析某任务的全部待分析截图
pub async fn analyze_all(
    store: Arc<dyn JobStore>,
    generation: Arc<dyn GenerationService>,
    config: &Config,
    job_id: &str,
) -> Result<AnalysisStats> {
    let pending: Vec<ScreenRecord> = store
        .list_screens(job_id)
        .await?
        .into_iter()
        .filter(|s| s.status == ScreenStatus::Crawled)
        .collect();

    if pending.is_empty() {
        info!("[{}] 没有待分析的截图", job_id);
        return Ok(AnalysisStats::default());
    }

    let batch_size = config.analysis_batch_size.max(1);
    let total = pending.len();
    let total_batches = (total + batch_size - 1) / batch_size;
    info!(
        "[{}] 🔬 开始分析 {} 张截图，每批 {} 张",
        job_id, total, batch_size
    );

    let semaphore = Arc::new(Semaphore::new(batch_size));
    let mut stats = AnalysisStats::default();

    for (batch_num, batch) in pending.chunks(batch_size).enumerate() {
        info!("[{}] 📦 分析第 {}/{} 批", job_id, batch_num + 1, total_batches);

        let mut handles = Vec::with_capacity(batch.len());
        for screen in batch {
            let permit = semaphore.clone().acquire_owned().await?;
            let store = store.clone();
            let generation = generation.clone();
            let screen = screen.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                analyze_one(store, generation, &screen).await
            }));
        }

        // 等待本批全部完成再开始下一批
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => stats.analyzed += 1,
                Ok(Err(e)) => {
                    warn!("[{}] ⚠️ 单张截图分析失败: {}", job_id, e);
                    stats.failed += 1;
                }
                Err(e) => {
                    warn!("[{}] ⚠️ 分析任务执行失败: {}", job_id, e);
                    stats.failed += 1;
                }
            }
        }
    }

    info!(
        "[{}] ✓ 截图分析完成: 成功 {} / 失败 {}",
        job_id, stats.analyzed, stats.failed
    );
    Ok(stats)
}

/// 分析单张截图并写回结果
///
/// 生成调用失败时把记录标为失败；返回内容不是合法 JSON 时
/// 视为可恢复，只标记已分析但不填类型。
async fn analyze_one(
    store: Arc<dyn JobStore>,
    generation: Arc<dyn GenerationService>,
    screen: &ScreenRecord,
) -> Result<()> {
    let prompt = format!(
        "请对下面的应用页面做截图分类。页面路由 {}，导航标签 \"{}\"。\n\
         返回 JSON 对象：{{\"screen_type\": dashboard|list|detail|form|settings|empty|other}}。\n\n\
         页面标记摘要：\n{}",
        screen.route,
        screen.nav_label,
        screen.markup.chars().take(3000).collect::<String>()
    );

    let result = generation
        .generate(&prompt, &[], GenOptions::default())
        .await;

    match result {
        Ok(text) => {
            let screen_type = extract_json_object(&text)
                .and_then(|v| v.get("screen_type").and_then(|t| t.as_str()).map(String::from));
            store
                .update_screen_analysis(&screen.id, screen_type, ScreenStatus::Analyzed)
                .await
        }
        Err(e) => {
            store
                .update_screen_analysis(&screen.id, None, ScreenStatus::Failed)
                .await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeGeneration;
    use crate::store::MemoryStore;

    fn record(job_id: &str, n: usize) -> ScreenRecord {
        ScreenRecord {
            id: format!("{}/feat-{}/hero", job_id, n),
            url: format!("https://app/x{}", n),
            route: format!("/x{}", n),
            nav_label: format!("X{}", n),
            screenshot_ref: "local://x.png".into(),
            markup: "<html><body>x</body></html>".into(),
            code_context: None,
            screen_type: String::new(),
            feature_id: format!("feat-{}", n),
            label: "hero".into(),
            order_index: 0,
            status: ScreenStatus::Crawled,
        }
    }

    #[tokio::test]
    async fn test_analyzes_in_batches_and_fills_type() {
        let store = Arc::new(MemoryStore::new());
        for n in 0..7 {
            store.insert_screen(record("j1", n)).await.unwrap();
        }
        let generation = Arc::new(FakeGeneration::new());
        generation.set_generic(r#"{"screen_type": "dashboard"}"#);

        let mut config = Config::default();
        config.analysis_batch_size = 3;
        let stats = analyze_all(store.clone(), generation, &config, "j1")
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 7);
        assert_eq!(stats.failed, 0);
        let screens = store.list_screens("j1").await.unwrap();
        assert!(screens
            .iter()
            .all(|s| s.status == ScreenStatus::Analyzed && s.screen_type == "dashboard"));
    }

    #[tokio::test]
    async fn test_generation_failure_marks_screen_failed_but_stage_survives() {
        let store = Arc::new(MemoryStore::new());
        store.insert_screen(record("j1", 0)).await.unwrap();
        let generation = Arc::new(FakeGeneration::new());
        generation.fail_prompt_containing("截图分类");

        let config = Config::default();
        let stats = analyze_all(store.clone(), generation, &config, "j1")
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 0);
        assert_eq!(stats.failed, 1);
        let screens = store.list_screens("j1").await.unwrap();
        assert_eq!(screens[0].status, ScreenStatus::Failed);
    }

    #[tokio::test]
    async fn test_malformed_json_still_marks_analyzed() {
        let store = Arc::new(MemoryStore::new());
        store.insert_screen(record("j1", 0)).await.unwrap();
        let generation = Arc::new(FakeGeneration::new());
        generation.set_generic("完全不是 JSON");

        let config = Config::default();
        let stats = analyze_all(store.clone(), generation, &config, "j1")
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 1);
        let screens = store.list_screens("j1").await.unwrap();
        assert_eq!(screens[0].status, ScreenStatus::Analyzed);
        assert!(screens[0].screen_type.is_empty());
    }
}
