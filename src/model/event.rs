use serde::{Deserialize, Serialize};

use crate::model::ids::{RequestId, RuleId, SessionId, TargetId};
use crate::model::request::Request;
use crate::model::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalResult {
    Blocked,
    Modified,
    Matched,
    Passed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRuleSummary {
    pub rule_id: RuleId,
    pub name: String,
    pub priority: i32,
}

/// The atomic per-request lifecycle event emitted to subscribers (§3).
/// At most one `NetworkEvent` per `RequestId` ever reaches a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub target_id: TargetId,
    pub timestamp_ms: u64,
    pub matched: bool,
    pub request: Request,
    pub response: Option<Response>,
    pub final_result: FinalResult,
    pub matched_rules: Vec<MatchedRuleSummary>,
}
