//! 登录与路由发现 - 业务能力层
//!
//! 职责：
//! - 登录目标应用（最多尝试配置的次数，每次都验证是否真的登录成功）
//! - 从导航结构收集同源路由
//! - 逐个访问路由并探测页面元信息（标题 / 错误页 / 表单 / 表格）
//!
//! 登录成功与否不看操作有没有报错，只看落点：
//! 当前 URL 不再是登录页模式、页面上不再有真实登录表单才算成功。

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::BrowserDriver;
use crate::models::{Credentials, DiscoveryResult};
use crate::services::capture_guard::session_expired;

/// 导航结构中发现的一条路由
#[derive(Debug, Clone)]
pub struct NavRoute {
    pub route: String,
    pub label: String,
}

/// 登录与路由发现服务
pub struct Discoverer<'a> {
    browser: &'a dyn BrowserDriver,
    config: &'a Config,
}

impl<'a> Discoverer<'a> {
    pub fn new(browser: &'a dyn BrowserDriver, config: &'a Config) -> Self {
        Self { browser, config }
    }

    /// 登录目标应用
    ///
    /// 每次尝试：导航到登录页 → 填写用户名 → 填写密码 → 提交 → 验证落点。
    /// 全部尝试失败后返回错误，由编排层决定置为失败并清除凭据。
    pub async fn authenticate(&self, login_url: &str, credentials: &Credentials) -> Result<()> {
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);
        let act_timeout = Duration::from_secs(self.config.act_timeout_secs);
        let attempts = self.config.login_attempts.max(1);

        for attempt in 1..=attempts {
            info!("🔐 登录尝试 {}/{}: {}", attempt, attempts, login_url);

            let result: Result<()> = async {
                self.browser.navigate(login_url, nav_timeout).await?;
                sleep(Duration::from_millis(self.config.settle_wait_ms)).await;

                self.browser
                    .act(
                        &format!(
                            "在登录表单的用户名或邮箱输入框中输入 {}",
                            credentials.username
                        ),
                        act_timeout,
                    )
                    .await?;
                self.browser
                    .act(
                        &format!("在登录表单的密码输入框中输入 {}", credentials.password),
                        act_timeout,
                    )
                    .await?;
                self.browser
                    .act("点击登录表单的提交按钮完成登录", act_timeout)
                    .await?;

                sleep(Duration::from_millis(self.config.settle_wait_ms)).await;
                Ok(())
            }
            .await;

            if let Err(e) = result {
                warn!("⚠️ 登录尝试 {} 执行出错: {}", attempt, e);
                continue;
            }

            // 验证落点，而不是相信操作的返回值
            let url = self.browser.current_url().await?;
            let markup = self.page_markup().await?;
            if !session_expired(&url, &markup) {
                info!("✓ 登录成功，落点: {}", url);
                return Ok(());
            }
            warn!("⚠️ 登录尝试 {} 后仍停留在登录页", attempt);
        }

        Err(anyhow::anyhow!("登录失败，已尝试 {} 次", attempts))
    }

    /// 从当前落点的导航结构收集同源路由
    pub async fn collect_routes(&self) -> Result<Vec<NavRoute>> {
        let value = self.browser.evaluate(COLLECT_ROUTES_JS).await?;
        let mut routes = Vec::new();
        if let Some(items) = value.as_array() {
            for item in items {
                let route = item.get("route").and_then(|v| v.as_str()).unwrap_or("");
                if route.is_empty() {
                    continue;
                }
                routes.push(NavRoute {
                    route: route.to_string(),
                    label: item
                        .get("label")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                });
                if routes.len() >= self.config.max_discovery_routes {
                    break;
                }
            }
        }
        info!("🔍 发现 {} 条导航路由", routes.len());
        Ok(routes)
    }

    /// 逐个访问路由并探测元信息
    ///
    /// 单个路由访问失败只记为不可访问，不中断整个发现阶段。
    pub async fn probe_routes(
        &self,
        base_url: &str,
        routes: &[NavRoute],
    ) -> Result<Vec<DiscoveryResult>> {
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);
        let mut results = Vec::with_capacity(routes.len());

        for nav in routes {
            let url = join_url(base_url, &nav.route);
            let mut result = DiscoveryResult::new(&nav.route, &nav.label);

            if let Err(e) = self.browser.navigate(&url, nav_timeout).await {
                warn!("⚠️ 路由 {} 不可访问: {}", nav.route, e);
                result.accessible = false;
                results.push(result);
                continue;
            }
            sleep(Duration::from_millis(self.config.settle_wait_ms)).await;

            match self.browser.evaluate(PROBE_PAGE_JS).await {
                Ok(meta) => {
                    if let Some(title) = meta.get("title").and_then(|v| v.as_str()) {
                        if !title.is_empty() {
                            result.title = title.to_string();
                        }
                    }
                    result.error_page = meta
                        .get("errorPage")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    result.has_form = meta
                        .get("hasForm")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    result.has_table = meta
                        .get("hasTable")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                }
                Err(e) => {
                    warn!("⚠️ 路由 {} 元信息探测失败: {}", nav.route, e);
                }
            }

            result.parent_category = parent_category(&nav.route);
            results.push(result);
        }

        let accessible = results.iter().filter(|r| r.accessible).count();
        info!("✓ 路由探测完成: {}/{} 可访问", accessible, results.len());
        Ok(results)
    }

    /// 读取当前页面的完整标记快照
    pub async fn page_markup(&self) -> Result<String> {
        let value = self.browser.evaluate(PAGE_MARKUP_JS).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

/// 深度为 2 的路由取第一段作为父分类提示
fn parent_category(route: &str) -> Option<String> {
    let segments: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() == 2 {
        Some(segments[0].to_string())
    } else {
        None
    }
}

/// 把路由拼接到应用根地址上
pub fn join_url(base_url: &str, route: &str) -> String {
    if route.starts_with("http://") || route.starts_with("https://") {
        return route.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}

/// 从导航结构收集同源路由
const COLLECT_ROUTES_JS: &str = r#"
(() => {
    const collectNavRoutes = () => {
        const seen = new Set();
        const out = [];
        const anchors = document.querySelectorAll(
            'nav a[href], aside a[href], [role="navigation"] a[href], a[href]');
        for (const a of anchors) {
            const href = a.getAttribute('href');
            if (!href || href.startsWith('#') || href.startsWith('mailto:') || href.startsWith('javascript:')) continue;
            let url;
            try { url = new URL(href, location.origin); } catch (e) { continue; }
            if (url.origin !== location.origin) continue;
            const route = url.pathname.replace(/\/+$/, '') || '/';
            if (seen.has(route)) continue;
            seen.add(route);
            out.push({ route, label: (a.innerText || '').trim().slice(0, 60) });
        }
        return out;
    };
    return collectNavRoutes();
})()
"#;

/// 探测当前页面的元信息
const PROBE_PAGE_JS: &str = r#"
(() => {
    const probePageMeta = () => {
        const text = ((document.body && document.body.innerText) || '').slice(0, 2000);
        const errorPage =
            /(404|not found|页面不存在|access denied|forbidden|something went wrong)/i.test(text) ||
            /404|error/i.test(document.title);
        return {
            title: document.title || '',
            errorPage: !!errorPage,
            hasForm: !!document.querySelector('form'),
            hasTable: !!(document.querySelector('table') || document.querySelector('[role="grid"]')),
        };
    };
    return probePageMeta();
})()
"#;

/// 读取完整页面标记
const PAGE_MARKUP_JS: &str = "document.documentElement.outerHTML";
