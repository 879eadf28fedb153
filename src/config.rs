//! 程序配置
//!
//! 默认值 → TOML 文件覆盖 → 环境变量覆盖。

use serde::Deserialize;

use crate::error::{ConfigError, JobError};
use crate::services::budget::BudgetParams;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否启动无头浏览器（false 时连接到调试端口）
    pub headless: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,

    // --- 任务默认值（CLI 模式下从这里建任务） ---
    /// 目标应用 URL
    pub target_app_url: String,
    /// 登录页 URL（可选）
    pub login_url: Option<String>,
    /// 登录用户名（可选）
    pub login_username: Option<String>,
    /// 登录密码（可选）
    pub login_password: Option<String>,
    /// 任务预算（最小货币单位）
    pub job_budget_cents: i64,

    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,

    // --- 截图上传 ---
    /// 上传服务地址，留空表示本地模式（只生成引用不上传）
    pub upload_base_url: String,

    // --- 超时（秒） ---
    pub nav_timeout_secs: u64,
    pub act_timeout_secs: u64,
    pub gen_timeout_secs: u64,

    // --- 等待（毫秒） ---
    /// 每次动作后的静置等待
    pub settle_wait_ms: u64,
    /// 加载指示器消失的最长等待
    pub loading_wait_ms: u64,
    /// 加载指示器轮询间隔
    pub loading_poll_ms: u64,

    // --- 采集上限 ---
    /// 单次任务全局截图上限
    pub max_screens_per_job: usize,
    /// 采集成功的最低截图数量
    pub min_screens: usize,
    /// 每个功能最多轻探的元素数
    pub max_probe_elements: usize,
    /// 每个功能主图之外最多的截图计划数
    pub max_plans_per_feature: usize,
    /// 整个采集过程共享的重新登录次数上限
    pub reauth_cap: usize,
    /// 发现阶段的登录尝试次数
    pub login_attempts: usize,
    /// 发现阶段收集路由的上限
    pub max_discovery_routes: usize,

    // --- 截图比较（可调参数，非硬性不变式） ---
    /// 每个功能最多的视觉比较次数
    pub vision_checks_per_feature: usize,
    /// 字节差异阈值，超过即认为截图明显变化
    pub screenshot_delta_bytes: usize,

    // --- 预算参数（最小货币单位） ---
    pub fixed_overhead_cents: i64,
    pub per_feature_cost_cents: i64,
    pub per_screen_cost_cents: i64,
    pub per_feature_prose_cents: i64,
    pub cross_cutting_cents: i64,
    /// 免费层功能数量上限
    pub free_tier_cap: usize,

    // --- 截图分析 ---
    /// 每批并发分析的截图数量
    pub analysis_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 2001,
            headless: false,
            verbose_logging: false,
            target_app_url: "http://localhost:3000".to_string(),
            login_url: None,
            login_username: None,
            login_password: None,
            job_budget_cents: 5000,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            upload_base_url: String::new(),
            nav_timeout_secs: 30,
            act_timeout_secs: 15,
            gen_timeout_secs: 30,
            settle_wait_ms: 500,
            loading_wait_ms: 5000,
            loading_poll_ms: 250,
            max_screens_per_job: 30,
            min_screens: 3,
            max_probe_elements: 3,
            max_plans_per_feature: 2,
            reauth_cap: 2,
            login_attempts: 2,
            max_discovery_routes: 40,
            vision_checks_per_feature: 2,
            screenshot_delta_bytes: 5000,
            fixed_overhead_cents: 500,
            per_feature_cost_cents: 300,
            per_screen_cost_cents: 25,
            per_feature_prose_cents: 50,
            cross_cutting_cents: 100,
            free_tier_cap: 10,
            analysis_batch_size: 5,
        }
    }
}

impl Config {
    /// 从环境变量加载配置（未设置的字段使用默认值）
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT", default.browser_debug_port),
            headless: env_parse("HEADLESS", default.headless),
            verbose_logging: env_parse("VERBOSE_LOGGING", default.verbose_logging),
            target_app_url: std::env::var("TARGET_APP_URL").unwrap_or(default.target_app_url),
            login_url: std::env::var("LOGIN_URL").ok().or(default.login_url),
            login_username: std::env::var("LOGIN_USERNAME").ok().or(default.login_username),
            login_password: std::env::var("LOGIN_PASSWORD").ok().or(default.login_password),
            job_budget_cents: env_parse("JOB_BUDGET_CENTS", default.job_budget_cents),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            upload_base_url: std::env::var("UPLOAD_BASE_URL").unwrap_or(default.upload_base_url),
            nav_timeout_secs: env_parse("NAV_TIMEOUT_SECS", default.nav_timeout_secs),
            act_timeout_secs: env_parse("ACT_TIMEOUT_SECS", default.act_timeout_secs),
            gen_timeout_secs: env_parse("GEN_TIMEOUT_SECS", default.gen_timeout_secs),
            settle_wait_ms: env_parse("SETTLE_WAIT_MS", default.settle_wait_ms),
            loading_wait_ms: env_parse("LOADING_WAIT_MS", default.loading_wait_ms),
            loading_poll_ms: env_parse("LOADING_POLL_MS", default.loading_poll_ms),
            max_screens_per_job: env_parse("MAX_SCREENS_PER_JOB", default.max_screens_per_job),
            min_screens: env_parse("MIN_SCREENS", default.min_screens),
            max_probe_elements: env_parse("MAX_PROBE_ELEMENTS", default.max_probe_elements),
            max_plans_per_feature: env_parse("MAX_PLANS_PER_FEATURE", default.max_plans_per_feature),
            reauth_cap: env_parse("REAUTH_CAP", default.reauth_cap),
            login_attempts: env_parse("LOGIN_ATTEMPTS", default.login_attempts),
            max_discovery_routes: env_parse("MAX_DISCOVERY_ROUTES", default.max_discovery_routes),
            vision_checks_per_feature: env_parse(
                "VISION_CHECKS_PER_FEATURE",
                default.vision_checks_per_feature,
            ),
            screenshot_delta_bytes: env_parse(
                "SCREENSHOT_DELTA_BYTES",
                default.screenshot_delta_bytes,
            ),
            fixed_overhead_cents: env_parse("FIXED_OVERHEAD_CENTS", default.fixed_overhead_cents),
            per_feature_cost_cents: env_parse(
                "PER_FEATURE_COST_CENTS",
                default.per_feature_cost_cents,
            ),
            per_screen_cost_cents: env_parse(
                "PER_SCREEN_COST_CENTS",
                default.per_screen_cost_cents,
            ),
            per_feature_prose_cents: env_parse(
                "PER_FEATURE_PROSE_CENTS",
                default.per_feature_prose_cents,
            ),
            cross_cutting_cents: env_parse("CROSS_CUTTING_CENTS", default.cross_cutting_cents),
            free_tier_cap: env_parse("FREE_TIER_CAP", default.free_tier_cap),
            analysis_batch_size: env_parse("ANALYSIS_BATCH_SIZE", default.analysis_batch_size),
        }
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file(path: &str) -> Result<Self, JobError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JobError::Config(ConfigError::FileReadFailed {
                path: path.to_string(),
                source: Box::new(e),
            })
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            JobError::Config(ConfigError::ParseFailed {
                path: path.to_string(),
                source: Box::new(e),
            })
        })?;
        Ok(config)
    }

    /// 组装预算参数
    pub fn budget_params(&self) -> BudgetParams {
        BudgetParams {
            fixed_overhead_cents: self.fixed_overhead_cents,
            per_feature_cost_cents: self.per_feature_cost_cents,
            per_screen_cost_cents: self.per_screen_cost_cents,
            per_feature_prose_cents: self.per_feature_prose_cents,
            cross_cutting_cents: self.cross_cutting_cents,
            free_tier_cap: self.free_tier_cap,
        }
    }
}

/// 解析环境变量，失败时回退默认值
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
