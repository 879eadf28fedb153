/// 日志工具模块
///
/// 提供日志初始化和格式化的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化日志输出
///
/// 默认 info 级别，可以用 RUST_LOG 环境变量覆盖。
/// 重复调用是安全的（测试场景）。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `app_url`: 目标应用地址
/// - `budget_cents`: 任务预算
pub fn log_startup(app_url: &str, budget_cents: i64) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 应用文档采集模式");
    info!("🎯 目标应用: {}", app_url);
    info!("💰 任务预算: {} 分", budget_cents);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
