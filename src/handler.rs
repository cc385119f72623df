//! Turns one `Fetch.requestPaused` event into exactly one resolved CDP call
//! and, for every non-block, non-long-connection request, exactly one
//! emitted [`NetworkEvent`] (§3, §4.4). The two-stage state machine lives
//! here: request-stage rules apply immediately, response-stage rules are
//! pre-matched against the request context and replayed once the matching
//! response-stage paused event arrives, via [`crate::pending::PendingPool`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::action_executor::{self, ActionExecutor};
use crate::cdp::fetch;
use crate::client::CdpClient;
use crate::event_dispatcher::EventDispatcher;
use crate::model::{
    FinalResult, HeaderMap, MatchedRuleSummary, NetworkEvent, Request, RequestId, Response, SessionId, Stage,
    TargetId,
};
use crate::pending::{PendingPool, PendingRequest};
use crate::rule_engine::{MatchedRule, RuleEngine};

/// Bound on `Fetch.getResponseBody` (§4.4, §5): a slow or hung call to
/// fetch a body must never stall the paused request past this.
const RESPONSE_BODY_TIMEOUT: Duration = Duration::from_millis(500);

/// A Drop-based guarantee that a paused request is always resolved, even
/// if a panic unwinds past `Handler` or the per-event timeout fires and
/// drops the in-flight future (§5, §9 — a hand-rolled alternative to
/// pulling in `scopeguard` for one call site). `disarm` is called once the
/// real resolution call has actually been issued; if it never is, `Drop`
/// spawns a best-effort safety continue so the browser never hangs.
struct ContinueGuard {
    client: CdpClient,
    request_id: String,
    stage: Stage,
    armed: bool,
}

impl ContinueGuard {
    fn new(client: CdpClient, request_id: String, stage: Stage) -> Self {
        Self { client, request_id, stage, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContinueGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let request_id = self.request_id.clone();
        let stage = self.stage;
        tracing::warn!(%request_id, ?stage, "request was never resolved, issuing safety continue");
        crate::spawn::spawn(async move {
            match stage {
                Stage::Request => action_executor::continue_request(&client, &request_id).await,
                Stage::Response => action_executor::continue_response(&client, &request_id).await,
            }
        });
    }
}

pub struct Handler {
    rule_engine: Option<Arc<RuleEngine>>,
    action_executor: Arc<ActionExecutor>,
    pending: Arc<PendingPool>,
    dispatcher: Arc<EventDispatcher>,
    session_id: SessionId,
    body_size_threshold: u64,
    process_timeout: Duration,
}

impl Handler {
    pub fn new(
        rule_engine: Option<Arc<RuleEngine>>,
        action_executor: Arc<ActionExecutor>,
        pending: Arc<PendingPool>,
        dispatcher: Arc<EventDispatcher>,
        session_id: SessionId,
        body_size_threshold: u64,
        process_timeout: Duration,
    ) -> Self {
        Self {
            rule_engine,
            action_executor,
            pending,
            dispatcher,
            session_id,
            body_size_threshold,
            process_timeout,
        }
    }

    /// Entry point for one `Fetch.requestPaused` event. Bounded by
    /// `process_timeout`; on timeout the in-flight future (and the
    /// `ContinueGuard` it owns) is dropped, firing the safety continue
    /// (§5).
    pub async fn handle(&self, client: CdpClient, target_id: TargetId, event: fetch::RequestPausedEvent) {
        let request_id = event.request_id.clone();
        let stage = detect_stage(&event);
        let guard = ContinueGuard::new(client.clone(), request_id.clone(), stage);
        let outcome = crate::timer::timeout(self.process_timeout, self.process(client, target_id, event, stage, guard)).await;
        if outcome.is_err() {
            tracing::warn!(%request_id, ?stage, "request processing timed out");
        }
    }

    async fn process(
        &self,
        client: CdpClient,
        target_id: TargetId,
        event: fetch::RequestPausedEvent,
        stage: Stage,
        mut guard: ContinueGuard,
    ) {
        match stage {
            Stage::Request => self.handle_request(client, target_id, event, &mut guard).await,
            Stage::Response => self.handle_response(client, target_id, event, &mut guard).await,
        }
    }

    async fn handle_request(
        &self,
        client: CdpClient,
        target_id: TargetId,
        event: fetch::RequestPausedEvent,
        guard: &mut ContinueGuard,
    ) {
        let request_id = RequestId::new(event.request_id.clone());
        let headers = headers_from_paused(&event.request.headers);
        let body = decode_post_data(&event.request);
        let ctx = Request::build(
            request_id.clone(),
            event.request.url.clone(),
            event.request.method.clone(),
            &event.resource_type,
            headers,
            body,
        );

        let is_long_connection = is_long_connection(&ctx, &event.resource_type);

        let matched = self.rule_engine.as_ref().map(|engine| engine.eval(&ctx)).unwrap_or_default();
        if let Some(engine) = &self.rule_engine {
            engine.record_stats(&matched);
        }
        let (request_rules, response_rules): (Vec<MatchedRule>, Vec<MatchedRule>) =
            matched.into_iter().partition(|m| m.rule.stage == Stage::Request);

        let mutation = self.action_executor.execute_request(&ctx, &request_rules);
        let summaries = summarize(&request_rules);

        if let Some(block) = &mutation.block {
            let response = Response::new(
                block.status,
                HeaderMap::from_pairs(block.headers.iter().map(|(k, v)| (k.clone(), v.clone()))),
                block.body.clone(),
            );
            action_executor::apply_request_mutation(&client, &event.request_id, &ctx, &mutation).await;
            guard.disarm();
            self.emit(request_id, target_id, ctx, Some(response), FinalResult::Blocked, summaries);
            return;
        }

        let request_modified = !mutation.is_empty();
        action_executor::apply_request_mutation(&client, &event.request_id, &ctx, &mutation).await;
        guard.disarm();

        if is_long_connection {
            // A long-lived connection never gets a response-stage paused
            // event to replay against (§4.4), so the request-stage mutation
            // and match are the whole story: emit now instead of parking it
            // in the pending pool.
            let final_result = final_result_for(request_modified, false, &summaries);
            self.emit(request_id, target_id, ctx, None, final_result, summaries);
            return;
        }

        // Every non-blocked, non-long-connection request still gets a
        // response-stage paused event (both stage patterns are always
        // registered, §4.4), so it always needs an entry to be replayed
        // against, even when no rule ever matched.
        self.pending.insert(
            request_id,
            PendingRequest::new(ctx, summaries, response_rules, request_modified),
        );
    }

    async fn handle_response(
        &self,
        client: CdpClient,
        target_id: TargetId,
        event: fetch::RequestPausedEvent,
        guard: &mut ContinueGuard,
    ) {
        let request_id = RequestId::new(event.request_id.clone());
        let pending = match self.pending.take(&request_id) {
            Some(pending) => pending,
            None => {
                tracing::debug!(
                    request_id = %event.request_id,
                    "response stage paused event with no tracked request, passing through"
                );
                action_executor::continue_response(&client, &event.request_id).await;
                guard.disarm();
                return;
            }
        };

        if !pending.try_commit() {
            action_executor::continue_response(&client, &event.request_id).await;
            guard.disarm();
            return;
        }

        if let Some(reason) = &event.response_error_reason {
            tracing::debug!(
                request_id = %event.request_id,
                %reason,
                "response stage reports a network error, resolving without body capture"
            );
            action_executor::continue_response(&client, &event.request_id).await;
            guard.disarm();
            let final_result = final_result_for(pending.request_modified, false, &pending.matched_summaries);
            self.emit(request_id, target_id, pending.request, None, final_result, pending.matched_summaries);
            return;
        }

        let status = event.response_status_code.unwrap_or(0);
        let response_headers = event.response_headers.clone().unwrap_or_default();
        let headers = HeaderMap::from_pairs(response_headers.iter().map(|h| (h.name.clone(), h.value.clone())));
        let content_type = headers.get("content-type").map(str::to_string);
        let content_length = headers.get("content-length").and_then(|v| v.trim().parse::<u64>().ok());

        let oversize_reason = content_length
            .filter(|&len| len > self.body_size_threshold)
            .map(|len| format!("size exceeds limit ({len} bytes)"))
            .or_else(|| {
                content_type
                    .as_deref()
                    .filter(|ct| is_streaming_content_type(ct))
                    .map(|ct| format!("streaming content-type ({ct})"))
            });

        let body = if let Some(reason) = &oversize_reason {
            tracing::warn!(request_id = %event.request_id, %reason, "oversize-body guard triggered, body capture suppressed");
            placeholder_body(reason)
        } else {
            self.fetch_body(&client, &event.request_id).await
        };
        let oversize = oversize_reason.is_some();

        let mutation = self
            .action_executor
            .execute_response(content_type.as_deref(), &body, &pending.response_stage_rules, oversize);

        let response = Response::new(status, headers, body);
        action_executor::apply_response_mutation(&client, &event.request_id, &response, &mutation).await;
        guard.disarm();

        let captured = action_executor::merge_response_snapshot(&response, &mutation);

        let mut summaries = pending.matched_summaries;
        summaries.extend(summarize(&pending.response_stage_rules));

        let final_result = final_result_for(pending.request_modified, !mutation.is_empty(), &summaries);
        self.emit(request_id, target_id, pending.request, Some(captured), final_result, summaries);
    }

    async fn fetch_body(&self, client: &CdpClient, request_id: &str) -> Vec<u8> {
        let params = fetch::GetResponseBodyParams { request_id: request_id.to_string() };
        match crate::timer::timeout(RESPONSE_BODY_TIMEOUT, client.execute(params)).await {
            Ok(Ok(result)) => decode_response_body(result),
            Ok(Err(err)) => {
                tracing::warn!(%err, request_id, "getResponseBody failed, proceeding with an empty body");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(request_id, "getResponseBody timed out, proceeding with an empty body");
                Vec::new()
            }
        }
    }

    fn emit(
        &self,
        request_id: RequestId,
        target_id: TargetId,
        request: Request,
        response: Option<Response>,
        final_result: FinalResult,
        matched_rules: Vec<MatchedRuleSummary>,
    ) {
        let event = NetworkEvent {
            request_id,
            session_id: self.session_id.clone(),
            target_id,
            timestamp_ms: now_ms(),
            matched: !matched_rules.is_empty(),
            request,
            response,
            final_result,
            matched_rules,
        };
        self.dispatcher.emit(event);
    }
}

pub(crate) fn detect_stage(event: &fetch::RequestPausedEvent) -> Stage {
    if event.response_status_code.is_some() || event.response_error_reason.is_some() {
        Stage::Response
    } else {
        Stage::Request
    }
}

fn final_result_for(request_modified: bool, response_modified: bool, summaries: &[MatchedRuleSummary]) -> FinalResult {
    if request_modified || response_modified {
        FinalResult::Modified
    } else if !summaries.is_empty() {
        FinalResult::Matched
    } else {
        FinalResult::Passed
    }
}

fn summarize(matched: &[MatchedRule]) -> Vec<MatchedRuleSummary> {
    matched
        .iter()
        .map(|m| MatchedRuleSummary {
            rule_id: m.rule.id.clone(),
            name: m.rule.name.clone(),
            priority: m.rule.priority,
        })
        .collect()
}

fn headers_from_paused(headers: &serde_json::Map<String, serde_json::Value>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let Some(value) = value.as_str() {
            map.set(name.clone(), value.to_string());
        }
    }
    map
}

/// Concatenate base64-decoded `postDataEntries`, falling back to plain
/// `postData`, per §4.4's "base64-decoded postDataEntries concatenation".
fn decode_post_data(request: &fetch::PausedRequest) -> Vec<u8> {
    use base64::Engine;
    if let Some(entries) = &request.post_data_entries {
        let mut body = Vec::new();
        for entry in entries {
            if let Some(bytes) = &entry.bytes {
                match base64::engine::general_purpose::STANDARD.decode(bytes) {
                    Ok(mut decoded) => body.append(&mut decoded),
                    Err(err) => tracing::warn!(%err, "postDataEntries chunk failed to base64-decode, skipping"),
                }
            }
        }
        return body;
    }
    request.post_data.clone().map(String::into_bytes).unwrap_or_default()
}

fn decode_response_body(result: fetch::GetResponseBodyResult) -> Vec<u8> {
    if result.base64_encoded {
        use base64::Engine;
        match base64::engine::general_purpose::STANDARD.decode(&result.body) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, "getResponseBody result failed to base64-decode, treating as empty");
                Vec::new()
            }
        }
    } else {
        result.body.into_bytes()
    }
}

fn placeholder_body(reason: &str) -> Vec<u8> {
    format!("[Body omitted: {reason}]").into_bytes()
}

fn is_streaming_content_type(content_type: &str) -> bool {
    let lower = content_type.trim().to_ascii_lowercase();
    let base = lower.split(';').next().unwrap_or(&lower);
    base.starts_with("video/")
        || base.starts_with("audio/")
        || base == "text/event-stream"
        || base == "application/octet-stream"
}

/// A WebSocket/EventSource resource, or any request carrying an `Upgrade`
/// header, is a long-lived connection that never reaches a response-stage
/// paused event and so must bypass the pending pool (§4.4 "long-connection
/// short-circuit") — it still goes through normal request-stage rule
/// evaluation first.
fn is_long_connection(ctx: &Request, cdp_resource_type: &str) -> bool {
    ctx.resource_type == crate::model::ResourceType::Websocket
        || cdp_resource_type.eq_ignore_ascii_case("eventsource")
        || ctx.headers.get("upgrade").is_some()
        || ctx
            .headers
            .get("connection")
            .map(|v| v.to_ascii_lowercase().contains("upgrade"))
            .unwrap_or(false)
        || ctx
            .headers
            .get("accept")
            .map(|v| v.eq_ignore_ascii_case("text/event-stream"))
            .unwrap_or(false)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderMap as HM, LowerMap, ResourceType};

    fn ctx(headers: HM) -> Request {
        Request {
            request_id: RequestId::new("r1"),
            url: "https://x/".into(),
            method: "GET".into(),
            resource_type: ResourceType::Xhr,
            headers,
            query: LowerMap::new(),
            cookies: LowerMap::new(),
            body: vec![],
        }
    }

    #[test]
    fn websocket_resource_type_is_a_long_connection() {
        let mut c = ctx(HM::new());
        c.resource_type = ResourceType::Websocket;
        assert!(is_long_connection(&c, "WebSocket"));
    }

    #[test]
    fn upgrade_header_is_a_long_connection() {
        let mut h = HM::new();
        h.set("Upgrade", "websocket");
        assert!(is_long_connection(&ctx(h), "XHR"));
    }

    #[test]
    fn event_stream_accept_header_is_a_long_connection() {
        let mut h = HM::new();
        h.set("Accept", "text/event-stream");
        assert!(is_long_connection(&ctx(h), "Fetch"));
    }

    #[test]
    fn ordinary_request_is_not_a_long_connection() {
        assert!(!is_long_connection(&ctx(HM::new()), "XHR"));
    }

    #[test]
    fn streaming_content_types_are_recognized() {
        assert!(is_streaming_content_type("video/mp4"));
        assert!(is_streaming_content_type("audio/mpeg"));
        assert!(is_streaming_content_type("text/event-stream"));
        assert!(is_streaming_content_type("application/octet-stream"));
        assert!(!is_streaming_content_type("application/json"));
        assert!(!is_streaming_content_type("text/html"));
    }

    #[test]
    fn final_result_prefers_modified_over_matched() {
        let summaries = vec![MatchedRuleSummary {
            rule_id: crate::model::RuleId::new("r"),
            name: "r".into(),
            priority: 1,
        }];
        assert_eq!(final_result_for(true, false, &summaries), FinalResult::Modified);
        assert_eq!(final_result_for(false, false, &summaries), FinalResult::Matched);
        assert_eq!(final_result_for(false, false, &[]), FinalResult::Passed);
    }

    #[test]
    fn post_data_entries_are_base64_decoded_and_concatenated() {
        use base64::Engine;
        let a = base64::engine::general_purpose::STANDARD.encode("hello ");
        let b = base64::engine::general_purpose::STANDARD.encode("world");
        let request = fetch::PausedRequest {
            url: "https://x/".into(),
            method: "POST".into(),
            headers: serde_json::Map::new(),
            post_data: None,
            has_post_data: true,
            post_data_entries: Some(vec![
                fetch::PostDataEntry { bytes: Some(a) },
                fetch::PostDataEntry { bytes: Some(b) },
            ]),
        };
        assert_eq!(decode_post_data(&request), b"hello world");
    }

    #[test]
    fn placeholder_body_mentions_the_triggering_reason() {
        let body = placeholder_body("size exceeds limit (10000000 bytes)");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "[Body omitted: size exceeds limit (10000000 bytes)]"
        );
    }

    #[test]
    fn placeholder_body_reports_streaming_content_type() {
        let body = placeholder_body("streaming content-type (video/mp4)");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "[Body omitted: streaming content-type (video/mp4)]"
        );
    }
}
