use serde::{Deserialize, Serialize};

use crate::model::action::Action;
use crate::model::ids::RuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Request,
    Response,
}

/// A single rule: a match predicate and the ordered actions to apply when
/// it fires. A rule only ever applies in its declared `stage` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub stage: Stage,
    #[serde(default)]
    pub r#match: Match,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_true() -> bool {
    true
}

/// Two optional condition groups, conjoined. An empty `Match` (both groups
/// empty) matches everything (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Match {
    #[serde(default, rename = "allOf")]
    pub all_of: Vec<Condition>,
    #[serde(default, rename = "anyOf")]
    pub any_of: Vec<Condition>,
}

impl Match {
    pub fn is_empty(&self) -> bool {
        self.all_of.is_empty() && self.any_of.is_empty()
    }
}

/// The exhaustive condition variant set from §4.2. Unknown condition types
/// deserialize into `Unknown` via serde's catch-all, and always evaluate
/// to `false` rather than erroring (§4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    #[serde(rename = "urlEquals")]
    UrlEquals { value: String },
    #[serde(rename = "urlPrefix")]
    UrlPrefix { value: String },
    #[serde(rename = "urlSuffix")]
    UrlSuffix { value: String },
    #[serde(rename = "urlContains")]
    UrlContains { value: String },
    #[serde(rename = "urlRegex")]
    UrlRegex { pattern: String },
    #[serde(rename = "method")]
    Method { values: Vec<String> },
    #[serde(rename = "resourceType")]
    ResourceType { values: Vec<String> },
    #[serde(rename = "headerExists")]
    HeaderExists { name: String },
    #[serde(rename = "headerNotExists")]
    HeaderNotExists { name: String },
    #[serde(rename = "headerEquals")]
    HeaderEquals { name: String, value: String },
    #[serde(rename = "headerContains")]
    HeaderContains { name: String, value: String },
    #[serde(rename = "headerRegex")]
    HeaderRegex { name: String, pattern: String },
    #[serde(rename = "queryExists")]
    QueryExists { name: String },
    #[serde(rename = "queryNotExists")]
    QueryNotExists { name: String },
    #[serde(rename = "queryEquals")]
    QueryEquals { name: String, value: String },
    #[serde(rename = "queryContains")]
    QueryContains { name: String, value: String },
    #[serde(rename = "queryRegex")]
    QueryRegex { name: String, pattern: String },
    #[serde(rename = "cookieExists")]
    CookieExists { name: String },
    #[serde(rename = "cookieNotExists")]
    CookieNotExists { name: String },
    #[serde(rename = "cookieEquals")]
    CookieEquals { name: String, value: String },
    #[serde(rename = "cookieContains")]
    CookieContains { name: String, value: String },
    #[serde(rename = "cookieRegex")]
    CookieRegex { name: String, pattern: String },
    #[serde(rename = "bodyContains")]
    BodyContains { value: String },
    #[serde(rename = "bodyRegex")]
    BodyRegex { pattern: String },
    #[serde(rename = "bodyJsonPath")]
    BodyJsonPath { path: String, value: serde_json::Value },
    /// Anything the config author or a newer core version introduced that
    /// this build doesn't recognize. Always evaluates to `false`.
    #[serde(other)]
    Unknown,
}
