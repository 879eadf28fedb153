//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层是整个系统的"指挥中心"，负责任务阶段推进与失败策略。
//!
//! ## 模块划分
//!
//! ### `pipeline` - 任务流水线状态机
//! - 按固定顺序推进阶段，每次推进先落库再干活
//! - 预算闸门：剩余预算不足时在任何付费工作前终止
//! - 每个阶段有明确的失败策略（降级 / 逐功能容错 / 致命）
//! - 凭据用完即清，顶层异常处理再防御性清一次
//!
//! ### `screen_analysis` - 截图批量分析器
//! - 分批 + 信号量控制有界并发
//! - 每张截图的分析互相独立，失败只影响自己
//!
//! ## 层次关系
//!
//! ```text
//! pipeline (处理单个 Job)
//!     ↓
//! workflow::FeatureFlow (处理单个 Feature)
//!     ↓
//! services (能力层：discovery / selection / budget / generation / uploader)
//!     ↓
//! infrastructure (基础设施：BrowserDriver)
//! ```

pub mod pipeline;
pub mod screen_analysis;

// 重新导出主要类型
pub use pipeline::JobPipeline;
pub use screen_analysis::{analyze_all, AnalysisStats};
