use std::fmt;

/// 应用程序错误类型
#[derive(Debug)]
pub enum JobError {
    /// 浏览器相关错误
    Browser(BrowserError),
    /// 内容生成服务错误
    Generation(GenerationError),
    /// 存储错误
    Store(StoreError),
    /// 认证错误
    Auth(AuthError),
    /// 流水线级别的致命错误
    Pipeline(PipelineError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Browser(e) => write!(f, "浏览器错误: {}", e),
            JobError::Generation(e) => write!(f, "内容生成错误: {}", e),
            JobError::Store(e) => write!(f, "存储错误: {}", e),
            JobError::Auth(e) => write!(f, "认证错误: {}", e),
            JobError::Pipeline(e) => write!(f, "流水线错误: {}", e),
            JobError::Config(e) => write!(f, "配置错误: {}", e),
            JobError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobError::Browser(e) => Some(e),
            JobError::Generation(e) => Some(e),
            JobError::Store(e) => Some(e),
            JobError::Auth(e) => Some(e),
            JobError::Pipeline(e) => Some(e),
            JobError::Config(e) => Some(e),
            JobError::Other(_) => None,
        }
    }
}

/// 浏览器相关错误
#[derive(Debug)]
pub enum BrowserError {
    /// 连接浏览器失败
    ConnectionFailed {
        port: u16,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 创建页面失败
    PageCreationFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 导航失败
    NavigationFailed {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 自然语言操作失败
    ActionFailed {
        instruction: String,
        detail: String,
    },
    /// 执行脚本失败
    ScriptExecutionFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 操作超时
    Timeout {
        operation: String,
        secs: u64,
    },
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserError::ConnectionFailed { port, source } => {
                write!(f, "无法连接到浏览器 (端口: {}): {}", port, source)
            }
            BrowserError::PageCreationFailed { source } => {
                write!(f, "创建页面失败: {}", source)
            }
            BrowserError::NavigationFailed { url, source } => {
                write!(f, "导航到 {} 失败: {}", url, source)
            }
            BrowserError::ActionFailed {
                instruction,
                detail,
            } => {
                write!(f, "操作 '{}' 执行失败: {}", instruction, detail)
            }
            BrowserError::ScriptExecutionFailed { source } => {
                write!(f, "执行脚本失败: {}", source)
            }
            BrowserError::Timeout { operation, secs } => {
                write!(f, "操作 '{}' 超时 ({}秒)", operation, secs)
            }
        }
    }
}

impl std::error::Error for BrowserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrowserError::ConnectionFailed { source, .. }
            | BrowserError::PageCreationFailed { source }
            | BrowserError::NavigationFailed { source, .. }
            | BrowserError::ScriptExecutionFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 内容生成服务错误
#[derive(Debug)]
pub enum GenerationError {
    /// API 调用失败
    ApiCallFailed {
        model: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 返回内容为空
    EmptyContent { model: String },
    /// 返回的 JSON 无法解析（调用方必须视为可恢复并使用兜底值）
    MalformedJson { snippet: String },
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::ApiCallFailed { model, source } => {
                write!(f, "生成服务调用失败 (模型: {}): {}", model, source)
            }
            GenerationError::EmptyContent { model } => {
                write!(f, "生成服务返回内容为空 (模型: {})", model)
            }
            GenerationError::MalformedJson { snippet } => {
                write!(f, "生成服务返回的 JSON 无法解析: {}", snippet)
            }
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerationError::ApiCallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 存储错误
#[derive(Debug)]
pub enum StoreError {
    /// 任务不存在
    JobNotFound { id: String },
    /// 截图记录不存在
    ScreenNotFound { id: String },
    /// 写入失败
    WriteFailed {
        what: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 上传失败（已重试一次）
    UploadFailed {
        label: String,
        detail: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::JobNotFound { id } => write!(f, "任务不存在: {}", id),
            StoreError::ScreenNotFound { id } => write!(f, "截图记录不存在: {}", id),
            StoreError::WriteFailed { what, source } => {
                write!(f, "写入 {} 失败: {}", what, source)
            }
            StoreError::UploadFailed { label, detail } => {
                write!(f, "截图 {} 上传失败: {}", label, detail)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::WriteFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 认证错误
#[derive(Debug)]
pub enum AuthError {
    /// 单次登录失败
    LoginFailed { attempt: usize, detail: String },
    /// 登录尝试耗尽（致命）
    Exhausted { attempts: usize },
    /// 需要登录但没有凭据
    MissingCredentials,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::LoginFailed { attempt, detail } => {
                write!(f, "第 {} 次登录失败: {}", attempt, detail)
            }
            AuthError::Exhausted { attempts } => {
                write!(f, "登录失败，已尝试 {} 次", attempts)
            }
            AuthError::MissingCredentials => write!(f, "需要登录但未提供凭据"),
        }
    }
}

impl std::error::Error for AuthError {}

/// 流水线级别的致命错误
#[derive(Debug)]
pub enum PipelineError {
    /// 剩余预算不足，任何付费工作开始之前就失败
    BudgetExhausted { remaining: i64 },
    /// 采集到的截图数量低于最低阈值
    BelowMinimumScreens { captured: usize, minimum: usize },
    /// 文档生成失败（最终装配失败）
    DocGenerationFailed { detail: String },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::BudgetExhausted { remaining } => {
                write!(f, "剩余预算不足 ({})，任务终止", remaining)
            }
            PipelineError::BelowMinimumScreens { captured, minimum } => {
                write!(
                    f,
                    "采集到的截图数量 {} 低于最低要求 {}",
                    captured, minimum
                )
            }
            PipelineError::DocGenerationFailed { detail } => {
                write!(f, "文档生成失败: {}", detail)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 环境变量解析失败
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取失败
    FileReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 配置文件解析失败
    ParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                    var_name, value, expected_type
                )
            }
            ConfigError::FileReadFailed { path, source } => {
                write!(f, "读取配置文件失败 ({}): {}", path, source)
            }
            ConfigError::ParseFailed { path, source } => {
                write!(f, "解析配置文件失败 ({}): {}", path, source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for JobError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        JobError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Generation(GenerationError::MalformedJson {
            snippet: err.to_string(),
        })
    }
}

// ========== 便捷构造函数 ==========

impl JobError {
    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        JobError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    /// 创建操作超时错误
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        JobError::Browser(BrowserError::Timeout {
            operation: operation.into(),
            secs,
        })
    }

    /// 创建生成服务调用错误
    pub fn generation_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        JobError::Generation(GenerationError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建认证耗尽错误
    pub fn auth_exhausted(attempts: usize) -> Self {
        JobError::Auth(AuthError::Exhausted { attempts })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, JobError>;
