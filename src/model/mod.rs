pub mod action;
pub mod config;
pub mod event;
pub mod ids;
pub mod request;
pub mod response;
pub mod rule;

pub use action::{Action, BlockPayload, RequestMutation, ResponseMutation};
pub use config::{RuleConfig, SessionConfig};
pub use event::{FinalResult, MatchedRuleSummary, NetworkEvent};
pub use ids::{RequestId, RuleId, SessionId, TargetId};
pub use request::{HeaderMap, LowerMap, Request, ResourceType};
pub use response::Response;
pub use rule::{Condition, Match, Rule, Stage};
