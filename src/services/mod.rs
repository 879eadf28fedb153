//! 业务能力层（Services Layer）
//!
//! 每个服务只描述一种能力，不关心流程：
//! - `budget` - 成本与预算估算（纯函数）
//! - `selection` - 功能挑选引擎（确定性）
//! - `capture_guard` - 去重与会话守卫
//! - `discovery` - 登录与路由发现
//! - `generation` - 内容生成（文本 + 视觉）
//! - `uploader` - 截图上传

pub mod budget;
pub mod capture_guard;
pub mod discovery;
pub mod generation;
pub mod selection;
pub mod uploader;

pub use capture_guard::CaptureGuard;
pub use discovery::{Discoverer, NavRoute};
pub use generation::{GenOptions, GenerationService, OpenAiGeneration};
pub use selection::{select_features, PageScore, SelectionInput, SelectionOutput};
pub use uploader::ScreenshotUploader;
