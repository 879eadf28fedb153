use std::sync::Arc;

use anyhow::Result;

use app_doc_crawler::config::Config;
use app_doc_crawler::infrastructure::{connect_to_browser_and_page, launch_headless_browser, CdpDriver};
use app_doc_crawler::models::{Credentials, Job};
use app_doc_crawler::orchestrator::JobPipeline;
use app_doc_crawler::services::{OpenAiGeneration, ScreenshotUploader};
use app_doc_crawler::store::MemoryStore;
use app_doc_crawler::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置（TOML 文件可选，环境变量覆盖）
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => Config::from_toml_file(&path)?,
        Err(_) => Config::from_env(),
    };

    logging::log_startup(&config.target_app_url, config.job_budget_cents);

    // 连接或启动浏览器
    let (_browser, page) = if config.headless {
        launch_headless_browser(&config.target_app_url).await?
    } else {
        connect_to_browser_and_page(config.browser_debug_port, None).await?
    };

    // 组装各层
    let store = Arc::new(MemoryStore::new());
    let browser = Arc::new(CdpDriver::new(page, &config));
    let generation = Arc::new(OpenAiGeneration::new(&config));
    let uploader = Arc::new(ScreenshotUploader::new(config.upload_base_url.clone()));

    // 从配置建一个任务
    let job_id = format!("job-{}", chrono::Local::now().format("%Y%m%d%H%M%S"));
    let mut job = Job::new(
        job_id.clone(),
        config.target_app_url.clone(),
        config.job_budget_cents,
    );
    job.login_url = config.login_url.clone();
    if let (Some(username), Some(password)) = (&config.login_username, &config.login_password) {
        job.credentials = Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        });
    }
    store.seed_job(job).await;

    // 运行流水线
    let pipeline = JobPipeline::new(store, browser, generation, uploader, config);
    pipeline.run(&job_id).await?;

    Ok(())
}
