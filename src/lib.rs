//! `interceptor-core`: an embeddable, rule-driven network-interception core
//! for Chromium-family browsers over the Chrome DevTools Protocol.
//!
//! A process may host many concurrent [`session::Session`]s behind a single
//! [`session::Service`] facade; each session owns one CDP endpoint (one
//! browser instance) and drives its own rule engine, pending pool and worker
//! pool. The data flow per in-flight request is:
//!
//! ```text
//! browser tab -> CDP WS -> TargetSession -> InterceptorLoop -> WorkerPool
//!   -> Handler (per paused event) -> RuleEngine::eval -> ActionExecutor
//!   -> CDP resolution call -> EventDispatcher -> subscriber channel
//! ```
//!
//! The crate never leaves a paused `Fetch.requestPaused` event unresolved:
//! every exit path — a matched rule, a dropped worker-pool submission, a
//! panic, a per-event timeout — ends in exactly one `continueRequest`,
//! `continueResponse`, or `fulfillRequest` call for that request id.

pub mod action_executor;
pub mod cdp;
pub mod client;
pub mod conn;
pub mod error;
pub mod event_dispatcher;
pub mod handler;
pub mod interceptor_loop;
pub mod json_patch;
pub mod json_path;
pub mod model;
pub mod pending;
pub mod regex_cache;
pub mod rpc;
pub mod rule_engine;
pub mod session;
pub(crate) mod spawn;
pub(crate) mod target_manager;
pub(crate) mod timer;
pub mod worker_pool;

pub use error::{CdpError, CdpResult, SessionError, SessionResult};
pub use model::{
    Action, Condition, FinalResult, HeaderMap, Match, MatchedRuleSummary, NetworkEvent, Request,
    ResourceType, Response, Rule, RuleConfig, RuleId, SessionConfig, SessionId, Stage, TargetId,
};
pub use session::{Service, Session};
