//! 功能挑选引擎 - 业务能力层
//!
//! 给定输入后完全确定、无副作用：
//! 1. 按模式剔除非候选路由（落地页、认证页、定价页、法务页、错误页）
//! 2. 若有外部预扫分数，剔除低于文档价值中点的候选并记录
//! 3. 推导显示名称（外部建议 → 路由推导 → 清洗标题）
//! 4. 启发式打分（核心应用关键词、表单 / 表格、负面路由、路由深度、登录后落地路由）
//! 5. 剔除低于下限的候选
//! 6. 按 slug 去重（先到先得）
//! 7. 合并同父分类的候选（2 个以上）
//! 8. 降序排序，前 max_features 个入选，其余归入"附加"列表

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info};

use crate::models::feature::{slugify, AdditionalFeature, Feature, SubPage};
use crate::models::DiscoveryResult;

/// 预扫文档价值的中点阈值
const PRESCAN_MIDPOINT: f64 = 0.5;
/// 启发式得分下限，低于此值的候选被剔除
const SCORE_FLOOR: i64 = 10;
/// 登录后落地路由的加分
const POST_LOGIN_BONUS: i64 = 200;
/// 同父分类合并的加分
const GROUP_BONUS: i64 = 25;
/// 表单加分
const FORM_BONUS: i64 = 15;
/// 表格加分
const TABLE_BONUS: i64 = 10;

/// 核心应用关键词得分表
static KEYWORD_SCORES: phf::Map<&'static str, i64> = phf::phf_map! {
    "settings" => 40,
    "team" => 35,
    "billing" => 32,
    "calendar" => 30,
    "security" => 30,
    "contacts" => 28,
    "orders" => 28,
    "messag" => 28,
    "inbox" => 26,
    "dashboard" => 26,
    "report" => 25,
    "analytics" => 25,
    "project" => 25,
    "task" => 25,
    "customer" => 25,
    "invoice" => 25,
    "inventory" => 24,
    "workspace" => 20,
    "admin" => 20,
    "member" => 18,
    "profile" => 18,
    "integration" => 16,
    "notification" => 16,
};

/// 外部预扫产出的单页分数
#[derive(Debug, Clone)]
pub struct PageScore {
    /// 文档价值，0.0-1.0
    pub value: f64,
    /// 外部建议的显示名称
    pub suggested_name: Option<String>,
}

/// 挑选引擎输入
#[derive(Debug)]
pub struct SelectionInput<'a> {
    /// 发现阶段的原始结果
    pub pages: &'a [DiscoveryResult],
    /// 预算推导出的功能数上限
    pub max_features: usize,
    /// 可选的外部预扫分数（按路由索引）
    pub prescan: Option<&'a HashMap<String, PageScore>>,
    /// 登录后落地路由（永远保留）
    pub post_login_route: Option<&'a str>,
    /// 检测到的应用名（用于清洗标题）
    pub app_name: Option<&'a str>,
}

/// 挑选引擎输出
#[derive(Debug, Clone)]
pub struct SelectionOutput {
    /// 入选功能，优先级 1..k 连续
    pub selected: Vec<Feature>,
    /// 落选候选，只保留标题 + 描述
    pub additional: Vec<AdditionalFeature>,
}

/// 内部候选
#[derive(Debug, Clone)]
struct Candidate {
    page: DiscoveryResult,
    name: String,
    slug: String,
    score: i64,
    sub_pages: Vec<SubPage>,
}

/// 执行完整的挑选流程
pub fn select_features(input: &SelectionInput<'_>) -> SelectionOutput {
    // 步骤 1：剔除非候选路由
    let kept = filter_non_candidates(input.pages, input.post_login_route);

    // 步骤 2：预扫分数过滤
    let kept = apply_prescan(kept, input.prescan, input.post_login_route);

    // 步骤 3：推导显示名称
    let generic = has_generic_titles(&kept);
    let mut candidates: Vec<Candidate> = kept
        .into_iter()
        .map(|page| {
            let name = derive_name(&page, generic, input.prescan, input.app_name);
            let slug = slugify(&name);
            Candidate {
                page,
                name,
                slug,
                score: 0,
                sub_pages: Vec::new(),
            }
        })
        .collect();

    // 步骤 4：启发式打分
    for c in candidates.iter_mut() {
        c.score = heuristic_score(&c.page, &c.name, input.post_login_route);
        debug!("候选 {} ({}) 得分 {}", c.name, c.page.route, c.score);
    }

    // 步骤 5：剔除低分候选（登录后落地路由除外）
    candidates.retain(|c| {
        c.score >= SCORE_FLOOR || Some(c.page.route.as_str()) == input.post_login_route
    });

    // 步骤 6：按 slug 去重，先到先得
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.slug.clone()));

    // 步骤 7：合并同父分类
    let candidates = merge_categories(candidates);

    // 合并产物可能与既有候选同 slug（如 /settings 与 settings 分类），按得分再去重一次
    let candidates = dedup_by_slug_keep_best(candidates);

    // 步骤 8：降序排序并切分
    finalize(candidates, input.max_features)
}

// ========== 步骤实现 ==========

/// 非候选路由模式：落地页、认证页、定价页、法务页、错误页
fn non_candidate_pattern() -> Regex {
    Regex::new(
        r"(?i)(^/?$|log-?in|sign-?in|sign-?up|register|logout|forgot|password|/auth\b|/sso\b|pricing|/plans\b|terms|privacy|legal|cookie|/404\b|not-?found|/error\b)",
    )
    .expect("非候选路由模式应当是合法正则")
}

fn filter_non_candidates(
    pages: &[DiscoveryResult],
    post_login_route: Option<&str>,
) -> Vec<DiscoveryResult> {
    let pattern = non_candidate_pattern();
    pages
        .iter()
        .filter(|p| {
            // 登录后落地路由永远保留
            if Some(p.route.as_str()) == post_login_route {
                return true;
            }
            if !p.accessible || p.error_page {
                return false;
            }
            !pattern.is_match(&p.route)
        })
        .cloned()
        .collect()
}

fn apply_prescan(
    pages: Vec<DiscoveryResult>,
    prescan: Option<&HashMap<String, PageScore>>,
    post_login_route: Option<&str>,
) -> Vec<DiscoveryResult> {
    let Some(scores) = prescan else {
        return pages;
    };
    pages
        .into_iter()
        .filter(|p| {
            if Some(p.route.as_str()) == post_login_route {
                return true;
            }
            match scores.get(&p.route) {
                Some(score) if score.value < PRESCAN_MIDPOINT => {
                    info!(
                        "预扫剔除: {} (价值 {:.2} 低于阈值 {:.2})",
                        p.route, score.value, PRESCAN_MIDPOINT
                    );
                    false
                }
                _ => true,
            }
        })
        .collect()
}

/// 多数标题是否是同一个泛用标题（如整站都叫 "Dashboard"）
fn has_generic_titles(pages: &[DiscoveryResult]) -> bool {
    if pages.len() < 2 {
        return false;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for p in pages {
        *counts.entry(p.title.as_str()).or_default() += 1;
    }
    counts.values().any(|&n| n * 2 > pages.len())
}

fn derive_name(
    page: &DiscoveryResult,
    generic_titles: bool,
    prescan: Option<&HashMap<String, PageScore>>,
    app_name: Option<&str>,
) -> String {
    // 优先采用外部建议
    if let Some(scores) = prescan {
        if let Some(name) = scores
            .get(&page.route)
            .and_then(|s| s.suggested_name.clone())
        {
            return name;
        }
    }

    // 标题泛用时从路由推导
    if generic_titles || page.title.trim().is_empty() {
        return name_from_route(&page.route);
    }

    clean_title(&page.title, app_name)
        .unwrap_or_else(|| name_from_route(&page.route))
}

/// 从路由最后一段推导名称，如 `/settings/api-keys` → "Api Keys"
fn name_from_route(route: &str) -> String {
    let segment = route
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or("home");
    title_case(segment)
}

fn title_case(s: &str) -> String {
    s.split(|c: char| c == '-' || c == '_' || c == ' ')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 清洗标题：去掉分隔符后缀、框架前缀、泛用后缀和应用名
fn clean_title(title: &str, app_name: Option<&str>) -> Option<String> {
    let mut t = title.to_string();

    // 取第一个分隔段（"Settings | Acme" → "Settings"）
    for sep in [" | ", " - ", " – ", " · "] {
        if let Some(idx) = t.find(sep) {
            t = t[..idx].to_string();
        }
    }

    // 框架默认前缀
    for prefix in ["React App", "Vite App", "Next.js App", "Welcome to"] {
        if let Some(rest) = t.strip_prefix(prefix) {
            t = rest.to_string();
        }
    }

    // 应用名
    if let Some(app) = app_name {
        if !app.is_empty() {
            t = t.replace(app, "");
        }
    }

    // 泛用后缀单词
    let words: Vec<&str> = t
        .split_whitespace()
        .filter(|w| {
            !matches!(
                w.to_lowercase().as_str(),
                "page" | "view" | "screen" | "app"
            )
        })
        .collect();
    let cleaned = words.join(" ").trim().to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// 启发式打分
fn heuristic_score(page: &DiscoveryResult, name: &str, post_login_route: Option<&str>) -> i64 {
    let mut score: i64 = 0;
    let haystack = format!("{} {}", page.route, name).to_lowercase();

    // 核心应用关键词
    for (keyword, points) in KEYWORD_SCORES.entries() {
        if haystack.contains(keyword) {
            score += points;
        }
    }

    // 表单 / 表格
    if page.has_form {
        score += FORM_BONUS;
    }
    if page.has_table {
        score += TABLE_BONUS;
    }

    // 负面路由：演示、示例、错误、UI 展示
    let penalty = Regex::new(r"(?i)(demo|sample|example|playground|debug|/test\b|empty)")
        .expect("负面路由模式应当是合法正则");
    if penalty.is_match(&page.route) {
        score -= 40;
    }
    let showcase = Regex::new(r"(?i)(components|styleguide|storybook|ui-kit|icons)")
        .expect("UI 展示模式应当是合法正则");
    if showcase.is_match(&page.route) {
        score -= 30;
    }

    // 浅层路由小幅加分
    match page.depth() {
        0 | 1 => score += 10,
        2 => score += 5,
        _ => {}
    }

    // 登录后落地路由大幅加分
    if Some(page.route.as_str()) == post_login_route {
        score += POST_LOGIN_BONUS;
    }

    score
}

/// 按 slug 去重，同 slug 保留得分更高的候选
fn dedup_by_slug_keep_best(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<Candidate> = Vec::new();
    for c in candidates {
        match position.get(&c.slug) {
            Some(&i) if result[i].score >= c.score => {}
            Some(&i) => result[i] = c,
            None => {
                position.insert(c.slug.clone(), result.len());
                result.push(c);
            }
        }
    }
    result
}

/// 合并同父分类的候选（2 个以上合并为一个带 sub_pages 的功能）
fn merge_categories(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_category: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, c) in candidates.iter().enumerate() {
        if let Some(cat) = &c.page.parent_category {
            by_category.entry(cat.clone()).or_default().push(idx);
        }
    }

    let mut merged_away: std::collections::HashSet<usize> = std::collections::HashSet::new();
    let mut merged: Vec<(usize, Candidate)> = Vec::new();

    for (category, indices) in by_category {
        if indices.len() < 2 {
            continue;
        }
        // 合并得分 = 最高子页得分 + 分组加分
        let best_idx = *indices
            .iter()
            .max_by_key(|&&i| (candidates[i].score, std::cmp::Reverse(candidates[i].page.route.clone())))
            .expect("分组至少有两个成员");
        let best = &candidates[best_idx];

        let sub_pages: Vec<SubPage> = indices
            .iter()
            .map(|&i| SubPage {
                route: candidates[i].page.route.clone(),
                title: candidates[i].name.clone(),
            })
            .collect();

        let name = title_case(&category);
        let candidate = Candidate {
            page: DiscoveryResult {
                route: best.page.route.clone(),
                title: name.clone(),
                accessible: true,
                error_page: false,
                has_form: indices.iter().any(|&i| candidates[i].page.has_form),
                has_table: indices.iter().any(|&i| candidates[i].page.has_table),
                parent_category: None,
            },
            slug: slugify(&name),
            name,
            score: best.score + GROUP_BONUS,
            sub_pages,
        };

        let first_idx = *indices.iter().min().expect("分组至少有两个成员");
        for i in indices {
            merged_away.insert(i);
        }
        merged.push((first_idx, candidate));
    }

    // 保持原有顺序：合并后的候选放回分组首个成员的位置
    let mut result: Vec<Candidate> = Vec::new();
    merged.sort_by_key(|(idx, _)| *idx);
    let mut merged_iter = merged.into_iter().peekable();
    for (idx, c) in candidates.into_iter().enumerate() {
        while let Some((first_idx, _)) = merged_iter.peek() {
            if *first_idx == idx {
                let (_, mc) = merged_iter.next().expect("peek 已确认存在");
                result.push(mc);
            } else {
                break;
            }
        }
        if !merged_away.contains(&idx) {
            result.push(c);
        }
    }
    for (_, mc) in merged_iter {
        result.push(mc);
    }
    result
}

/// 排序、切分并重新赋优先级
fn finalize(mut candidates: Vec<Candidate>, max_features: usize) -> SelectionOutput {
    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.page.route.cmp(&b.page.route))
    });

    let mut selected = Vec::new();
    let mut additional = Vec::new();

    for (idx, c) in candidates.into_iter().enumerate() {
        if idx < max_features {
            selected.push(Feature {
                id: format!("feat-{}", c.slug),
                name: c.name,
                slug: c.slug,
                description: describe(&c.page),
                source_route: c.page.route,
                has_form: c.page.has_form,
                priority: idx + 1,
                sub_pages: c.sub_pages,
            });
        } else {
            // 落选候选剥离得分，只保留标题 + 描述
            additional.push(AdditionalFeature {
                title: c.name,
                description: describe(&c.page),
            });
        }
    }

    SelectionOutput {
        selected,
        additional,
    }
}

fn describe(page: &DiscoveryResult) -> String {
    let mut traits = Vec::new();
    if page.has_form {
        traits.push("表单交互");
    }
    if page.has_table {
        traits.push("数据表格");
    }
    if traits.is_empty() {
        format!("来自路由 {} 的功能页面", page.route)
    } else {
        format!("来自路由 {} 的功能页面，包含{}", page.route, traits.join("与"))
    }
}
