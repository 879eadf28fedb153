//! 去重与会话守卫 - 业务能力层
//!
//! 职责：
//! - 按 (URL, DOM 哈希) 对截图去重，作用域限定为单次采集运行
//! - 识别登录页 / 会话失效（URL 模式 + 真实登录表单双重判断）
//!
//! 状态归单次采集调用所有，并发任务之间不会互相污染。

use std::collections::HashSet;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

/// 截图去重守卫（任务作用域）
#[derive(Debug, Default)]
pub struct CaptureGuard {
    dom_hashes: HashSet<String>,
    captured_urls: HashSet<String>,
}

impl CaptureGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试登记一次主图采集
    ///
    /// URL 或 DOM 哈希任意一个已出现过即视为重复，返回 false；
    /// 否则登记两者并返回 true。同哈希不同 URL 仍然算重复。
    pub fn try_capture(&mut self, url: &str, dom_hash: &str) -> bool {
        if self.dom_hashes.contains(dom_hash) {
            debug!("去重命中 (DOM 哈希): {}", url);
            return false;
        }
        if self.captured_urls.contains(url) {
            debug!("去重命中 (URL): {}", url);
            return false;
        }
        self.dom_hashes.insert(dom_hash.to_string());
        self.captured_urls.insert(url.to_string());
        true
    }

    /// 登记一次显式豁免的追拍（同一 URL 上的 action / result 图）
    ///
    /// 只记录哈希，不参与重复判定。
    pub fn record_followup(&mut self, dom_hash: &str) {
        self.dom_hashes.insert(dom_hash.to_string());
    }

    /// 已登记的主图数量
    pub fn captured_count(&self) -> usize {
        self.captured_urls.len()
    }
}

/// 计算清洗后页面快照的 DOM 哈希
///
/// 去掉脚本、样式、注释并折叠空白后取 SHA-256，
/// 避免时间戳之类的噪声造成指纹抖动。
pub fn dom_hash(markup: &str) -> String {
    let cleaned = clean_markup(markup);
    let mut hasher = Sha256::new();
    hasher.update(cleaned.as_bytes());
    hex::encode(hasher.finalize())
}

fn clean_markup(markup: &str) -> String {
    let script = Regex::new(r"(?is)<script\b.*?</script>").expect("script 模式应当是合法正则");
    let style = Regex::new(r"(?is)<style\b.*?</style>").expect("style 模式应当是合法正则");
    let comment = Regex::new(r"(?s)<!--.*?-->").expect("注释模式应当是合法正则");
    let ws = Regex::new(r"\s+").expect("空白模式应当是合法正则");
    let between_tags = Regex::new(r">\s+<").expect("标签间空白模式应当是合法正则");

    let cleaned = script.replace_all(markup, "");
    let cleaned = style.replace_all(&cleaned, "");
    let cleaned = comment.replace_all(&cleaned, "");
    let cleaned = ws.replace_all(&cleaned, " ");
    // 被删掉的节点会留下标签之间的残余空白，一并去除，否则指纹抖动
    between_tags.replace_all(&cleaned, "><").trim().to_string()
}

// ========== 会话状态检测 ==========

/// URL 是否符合登录页模式
pub fn is_login_url(url: &str) -> bool {
    let pattern = Regex::new(r"(?i)(log-?in|sign-?in|/auth\b|/sso\b|session/new)")
        .expect("登录 URL 模式应当是合法正则");
    pattern.is_match(url)
}

/// 页面标记是否包含真实的登录表单
///
/// 要求表单内同时出现密码输入框和用户名 / 邮箱输入框，
/// 避免把"恰好有一个密码字段"的页面（如设置页）误判为登录页。
pub fn has_login_form(markup: &str) -> bool {
    let form = Regex::new(r"(?is)<form\b.*?</form>").expect("form 模式应当是合法正则");
    let password = Regex::new(r#"(?i)type\s*=\s*["']?password"#).expect("密码模式应当是合法正则");
    let identity = Regex::new(r#"(?i)(type\s*=\s*["']?email|name\s*=\s*["']?(user(name)?|email|login))"#)
        .expect("账号模式应当是合法正则");

    for m in form.find_iter(markup) {
        let body = m.as_str();
        if password.is_match(body) && identity.is_match(body) {
            return true;
        }
    }
    false
}

/// 会话是否已失效
///
/// URL 模式与真实登录表单同时命中才算失效，两者缺一不可。
pub fn session_expired(url: &str, markup: &str) -> bool {
    is_login_url(url) && has_login_form(markup)
}
