//! Evaluate a rule set against a request context; maintain hit stats
//! (§4.2).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{Condition, Request, Rule, RuleConfig, RuleId, Stage};
use crate::regex_cache::RegexCache;

#[derive(Debug, Clone)]
pub struct MatchedRule {
    pub rule: Arc<Rule>,
}

#[derive(Debug, Default)]
struct Stats {
    total: u64,
    matched: u64,
    by_rule: HashMap<RuleId, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub total: u64,
    pub matched: u64,
    pub by_rule: HashMap<RuleId, u64>,
}

/// Rules pre-sorted by descending priority at `update` time, with ties
/// broken by original (stable) insertion order — sorting once here means
/// `eval` never has to re-derive the tie-break on every request (§3, §4.2).
#[derive(Debug, Default)]
struct CompiledRuleSet {
    rules: Vec<Arc<Rule>>,
}

impl From<RuleConfig> for CompiledRuleSet {
    fn from(config: RuleConfig) -> Self {
        let mut rules: Vec<Arc<Rule>> = config.rules.into_iter().map(Arc::new).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }
}

pub struct RuleEngine {
    active: arc_swap::ArcSwap<CompiledRuleSet>,
    regex_cache: Arc<RegexCache>,
    stats: Mutex<Stats>,
}

impl RuleEngine {
    pub fn new(regex_cache: Arc<RegexCache>) -> Self {
        Self {
            active: arc_swap::ArcSwap::from_pointee(CompiledRuleSet::default()),
            regex_cache,
            stats: Mutex::new(Stats::default()),
        }
    }

    /// Atomically swap the active ruleset. In-flight `eval` calls hold
    /// their own `Arc` snapshot via `load()` and are never interrupted
    /// (§4.2, §9).
    pub fn update(&self, config: RuleConfig) {
        self.active.store(Arc::new(CompiledRuleSet::from(config)));
    }

    /// Evaluate every enabled rule against `ctx`, in descending-priority
    /// order with a stable tie-break. An empty or absent ruleset yields an
    /// empty result. Rules from both stages are returned together — the
    /// caller (`Handler`) partitions the result by `rule.stage` (§4.4),
    /// since a response-stage rule's `Match` is still evaluated against the
    /// request context captured at request time.
    pub fn eval(&self, ctx: &Request) -> Vec<MatchedRule> {
        let snapshot = self.active.load();
        snapshot
            .rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter(|rule| self.matches(rule, ctx))
            .map(|rule| MatchedRule { rule: Arc::clone(rule) })
            .collect()
    }

    fn matches(&self, rule: &Rule, ctx: &Request) -> bool {
        if rule.r#match.is_empty() {
            return true;
        }
        let all_ok = rule.r#match.all_of.is_empty()
            || rule.r#match.all_of.iter().all(|c| self.eval_condition(c, ctx));
        let any_ok = rule.r#match.any_of.is_empty()
            || rule.r#match.any_of.iter().any(|c| self.eval_condition(c, ctx));
        all_ok && any_ok
    }

    fn eval_condition(&self, condition: &Condition, ctx: &Request) -> bool {
        match condition {
            Condition::UrlEquals { value } => ctx.url == *value,
            Condition::UrlPrefix { value } => ctx.url.starts_with(value.as_str()),
            Condition::UrlSuffix { value } => ctx.url.ends_with(value.as_str()),
            Condition::UrlContains { value } => ctx.url.contains(value.as_str()),
            Condition::UrlRegex { pattern } => self.regex_matches(pattern, &ctx.url),
            Condition::Method { values } => values.iter().any(|m| m.eq_ignore_ascii_case(&ctx.method)),
            Condition::ResourceType { values } => values
                .iter()
                .any(|v| resource_type_matches(v, ctx.resource_type)),
            Condition::HeaderExists { name } => ctx.headers.contains(name),
            Condition::HeaderNotExists { name } => !ctx.headers.contains(name),
            Condition::HeaderEquals { name, value } => {
                ctx.headers.get(name).map(|v| v == value).unwrap_or(false)
            }
            Condition::HeaderContains { name, value } => {
                ctx.headers.get(name).map(|v| v.contains(value.as_str())).unwrap_or(false)
            }
            Condition::HeaderRegex { name, pattern } => ctx
                .headers
                .get(name)
                .map(|v| self.regex_matches(pattern, v))
                .unwrap_or(false),
            Condition::QueryExists { name } => ctx.query.get(name).is_some(),
            Condition::QueryNotExists { name } => ctx.query.get(name).is_none(),
            Condition::QueryEquals { name, value } => {
                ctx.query.get(name).map(|v| v == value).unwrap_or(false)
            }
            Condition::QueryContains { name, value } => {
                ctx.query.get(name).map(|v| v.contains(value.as_str())).unwrap_or(false)
            }
            Condition::QueryRegex { name, pattern } => ctx
                .query
                .get(name)
                .map(|v| self.regex_matches(pattern, v))
                .unwrap_or(false),
            Condition::CookieExists { name } => ctx.cookies.get(name).is_some(),
            Condition::CookieNotExists { name } => ctx.cookies.get(name).is_none(),
            Condition::CookieEquals { name, value } => {
                ctx.cookies.get(name).map(|v| v == value).unwrap_or(false)
            }
            Condition::CookieContains { name, value } => ctx
                .cookies
                .get(name)
                .map(|v| v.contains(value.as_str()))
                .unwrap_or(false),
            Condition::CookieRegex { name, pattern } => ctx
                .cookies
                .get(name)
                .map(|v| self.regex_matches(pattern, v))
                .unwrap_or(false),
            Condition::BodyContains { value } => ctx.body_as_str().contains(value.as_str()),
            Condition::BodyRegex { pattern } => self.regex_matches(pattern, &ctx.body_as_str()),
            Condition::BodyJsonPath { path, value } => serde_json::from_slice::<serde_json::Value>(&ctx.body)
                .ok()
                .and_then(|doc| crate::json_path::extract(&doc, path).cloned())
                .map(|found| &found == value)
                .unwrap_or(false),
            // Unrecognized condition types never match (§4.2, §6), and a
            // bad regex or json path is likewise "did not match," not an
            // error (§7).
            Condition::Unknown => false,
        }
    }

    fn regex_matches(&self, pattern: &str, haystack: &str) -> bool {
        match self.regex_cache.get(pattern) {
            Ok(re) => re.is_match(haystack),
            Err(err) => {
                tracing::debug!(%pattern, %err, "rule regex failed to compile, treating as no match");
                false
            }
        }
    }

    /// Increment the total counter, and if `matched` is non-empty, the
    /// matched counter and a per-rule counter (§4.2).
    pub fn record_stats(&self, matched: &[MatchedRule]) {
        let mut stats = self.stats.lock();
        stats.total += 1;
        if !matched.is_empty() {
            stats.matched += 1;
            for m in matched {
                *stats.by_rule.entry(m.rule.id.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        let stats = self.stats.lock();
        StatsSnapshot {
            total: stats.total,
            matched: stats.matched,
            by_rule: stats.by_rule.clone(),
        }
    }
}

fn resource_type_matches(value: &str, actual: crate::model::ResourceType) -> bool {
    use crate::model::ResourceType::*;
    let expected = match value.to_ascii_lowercase().as_str() {
        "document" => Document,
        "stylesheet" => Stylesheet,
        "image" => Image,
        "media" => Media,
        "font" => Font,
        "script" => Script,
        "xhr" => Xhr,
        "fetch" => Fetch,
        "websocket" => Websocket,
        _ => Other,
    };
    expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderMap, Match, RequestId};

    fn rule(id: &str, priority: i32, stage: Stage) -> Rule {
        Rule {
            id: RuleId::new(id),
            name: id.to_string(),
            enabled: true,
            priority,
            stage,
            r#match: Match::default(),
            actions: vec![],
        }
    }

    fn ctx(url: &str) -> Request {
        Request::build(
            RequestId::new("r1"),
            url.to_string(),
            "GET".to_string(),
            "Document",
            HeaderMap::new(),
            vec![],
        )
    }

    #[test]
    fn eval_orders_by_descending_priority_with_stable_tiebreak() {
        let engine = RuleEngine::new(Arc::new(RegexCache::new()));
        let config = RuleConfig {
            id: "cfg".into(),
            rules: vec![
                rule("low", 1, Stage::Request),
                rule("high-a", 10, Stage::Request),
                rule("high-b", 10, Stage::Request),
            ],
            ..Default::default()
        };
        engine.update(config);
        let matched = engine.eval(&ctx("https://x/"));
        let ids: Vec<_> = matched.iter().map(|m| m.rule.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["high-a", "high-b", "low"]);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let engine = RuleEngine::new(Arc::new(RegexCache::new()));
        let mut r = rule("r", 1, Stage::Request);
        r.enabled = false;
        engine.update(RuleConfig {
            id: "cfg".into(),
            rules: vec![r],
            ..Default::default()
        });
        assert!(engine.eval(&ctx("https://x/")).is_empty());
    }

    #[test]
    fn empty_config_yields_empty_result() {
        let engine = RuleEngine::new(Arc::new(RegexCache::new()));
        assert!(engine.eval(&ctx("https://x/")).is_empty());
    }

    #[test]
    fn stats_count_total_matched_and_per_rule() {
        let engine = RuleEngine::new(Arc::new(RegexCache::new()));
        let r = rule("r1", 1, Stage::Request);
        engine.update(RuleConfig {
            id: "cfg".into(),
            rules: vec![r],
            ..Default::default()
        });
        let matched = engine.eval(&ctx("https://x/"));
        engine.record_stats(&matched);
        engine.record_stats(&[]);
        let snapshot = engine.get_stats();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.matched, 1);
        assert_eq!(snapshot.by_rule.get(&RuleId::new("r1")), Some(&1));
    }

    #[test]
    fn url_contains_condition() {
        let engine = RuleEngine::new(Arc::new(RegexCache::new()));
        let mut r = rule("block", 1, Stage::Request);
        r.r#match.all_of.push(Condition::UrlContains {
            value: "example.com/block".into(),
        });
        engine.update(RuleConfig {
            id: "cfg".into(),
            rules: vec![r],
            ..Default::default()
        });
        let matched = engine.eval(&ctx("https://example.com/block"));
        assert_eq!(matched.len(), 1);
        let not_matched = engine.eval(&ctx("https://example.com/allow"));
        assert!(not_matched.is_empty());
    }
}
