//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源（浏览器会话），只暴露能力：
//! - `BrowserDriver` - 浏览器自动化能力接口
//! - `CdpDriver` - 基于 CDP 的实现，自然语言操作由 AI 解释执行
//! - `connection` - 浏览器连接 / 启动辅助函数

pub mod browser_driver;
pub mod connection;

pub use browser_driver::{BrowserDriver, CdpDriver, Observation};
pub use connection::{connect_to_browser_and_page, launch_headless_browser};
