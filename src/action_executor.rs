//! Computes `RequestMutation`/`ResponseMutation` from matched rules and
//! applies the result via CDP (§4.3). Roughly a fifth of the core: this is
//! where the declarative rule language turns into concrete wire effects.

use base64::Engine;
use serde_json::Value;
use url::Url;

use crate::cdp::fetch;
use crate::client::CdpClient;
use crate::model::request::HeaderMap;
use crate::model::{Action, BlockPayload, Encoding, Request, RequestMutation, Response, ResponseMutation};
use crate::regex_cache::RegexCache;
use crate::rule_engine::MatchedRule;
use std::sync::Arc;

pub struct ActionExecutor {
    regex_cache: Arc<RegexCache>,
}

impl ActionExecutor {
    pub fn new(regex_cache: Arc<RegexCache>) -> Self {
        Self { regex_cache }
    }

    /// Fold every request-stage action from `matched` (priority order,
    /// then declaration order within a rule) into a single mutation.
    /// `block` is terminal: evaluation stops the instant one is seen
    /// (§4.3).
    pub fn execute_request(&self, ctx: &Request, matched: &[MatchedRule]) -> RequestMutation {
        let mut mutation = RequestMutation::default();
        let mut body = ctx.body.clone();
        let mut body_touched = false;

        for m in matched {
            for action in &m.rule.actions {
                match action {
                    Action::SetUrl { value } => mutation.url = Some(value.clone()),
                    Action::SetMethod { value } => mutation.method = Some(value.clone()),
                    Action::SetHeader { name, value } => mutation.set_headers.set(name, value.clone()),
                    Action::RemoveHeader { name } => mutation.remove_headers.push(name.clone()),
                    Action::SetQueryParam { name, value } => {
                        mutation.set_query.insert(name.clone(), value.clone());
                    }
                    Action::RemoveQueryParam { name } => mutation.remove_query.push(name.clone()),
                    Action::SetCookie { name, value } => {
                        mutation.set_cookies.insert(name.clone(), value.clone());
                    }
                    Action::RemoveCookie { name } => mutation.remove_cookies.push(name.clone()),
                    Action::SetBody { value, encoding } => {
                        body = self.decode_set_body(value, *encoding, &body);
                        body_touched = true;
                    }
                    Action::ReplaceBodyText { find, replace, pattern, all } => {
                        body = self.replace_body_text(&body, find, replace, *pattern, *all);
                        body_touched = true;
                    }
                    Action::PatchBodyJson { ops } => {
                        body = self.patch_body_json(&body, ops);
                        body_touched = true;
                    }
                    Action::SetFormField { name, value } => {
                        body = self.set_form_field(ctx.headers.get("content-type"), &body, name, Some(value));
                        body_touched = true;
                    }
                    Action::RemoveFormField { name } => {
                        body = self.set_form_field(ctx.headers.get("content-type"), &body, name, None);
                        body_touched = true;
                    }
                    Action::Block { status, headers, body } => {
                        mutation.block = Some(BlockPayload {
                            status: *status,
                            headers: headers.clone(),
                            body: body.clone().into_bytes(),
                        });
                        return mutation;
                    }
                    // Response-stage-only actions are no-ops when they appear
                    // on a request-stage rule (§4.3's per-action stage column).
                    Action::SetStatus { .. } | Action::Unknown => {}
                }
            }
        }

        if body_touched {
            mutation.body = Some(body);
        }
        self.finalize_request_mutation(ctx, &mut mutation);
        mutation
    }

    /// Fold every response-stage action from `matched` into a single
    /// mutation, starting from `body` as the initial working body (§4.4
    /// step 5). `suppress_body`, set when the oversize-body guard (§4.4)
    /// has triggered, turns every body-modifying action into a warn-logged
    /// no-op while status/header actions still apply.
    pub fn execute_response(
        &self,
        content_type: Option<&str>,
        body: &[u8],
        matched: &[MatchedRule],
        suppress_body: bool,
    ) -> ResponseMutation {
        let mut mutation = ResponseMutation::default();
        let mut working = body.to_vec();
        let mut body_touched = false;
        let mut warned = false;

        for m in matched {
            for action in &m.rule.actions {
                match action {
                    Action::SetStatus { value } => mutation.status = Some(*value),
                    Action::SetHeader { name, value } => mutation.set_headers.set(name, value.clone()),
                    Action::RemoveHeader { name } => mutation.remove_headers.push(name.clone()),
                    Action::SetBody { .. } | Action::ReplaceBodyText { .. } | Action::PatchBodyJson { .. }
                        if suppress_body =>
                    {
                        if !warned {
                            tracing::warn!("response body mutation ignored: oversize-body guard triggered");
                            warned = true;
                        }
                    }
                    Action::SetBody { value, encoding } => {
                        working = self.decode_set_body(value, *encoding, &working);
                        body_touched = true;
                    }
                    Action::ReplaceBodyText { find, replace, pattern, all } => {
                        working = self.replace_body_text(&working, find, replace, *pattern, *all);
                        body_touched = true;
                    }
                    Action::PatchBodyJson { ops } => {
                        working = self.patch_body_json(&working, ops);
                        body_touched = true;
                    }
                    // Request-stage-only actions are no-ops at response stage.
                    Action::SetUrl { .. }
                    | Action::SetMethod { .. }
                    | Action::SetQueryParam { .. }
                    | Action::RemoveQueryParam { .. }
                    | Action::SetCookie { .. }
                    | Action::RemoveCookie { .. }
                    | Action::SetFormField { .. }
                    | Action::RemoveFormField { .. }
                    | Action::Block { .. }
                    | Action::Unknown => {
                        let _ = content_type;
                    }
                }
            }
        }

        if body_touched {
            mutation.body = Some(working);
        }
        mutation
    }

    fn decode_set_body(&self, value: &str, encoding: Option<Encoding>, previous: &[u8]) -> Vec<u8> {
        match encoding {
            Some(Encoding::Base64) => match base64::engine::general_purpose::STANDARD.decode(value) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(%err, "setBody base64 decode failed, leaving body unchanged");
                    previous.to_vec()
                }
            },
            None => value.as_bytes().to_vec(),
        }
    }

    fn replace_body_text(&self, body: &[u8], find: &str, replace: &str, pattern: bool, all: bool) -> Vec<u8> {
        let text = String::from_utf8_lossy(body).into_owned();
        let replaced = if pattern {
            match self.regex_cache.get(find) {
                Ok(re) => {
                    if all {
                        re.replace_all(&text, regex::NoExpand(replace)).into_owned()
                    } else {
                        re.replacen(&text, 1, regex::NoExpand(replace)).into_owned()
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, pattern = find, "replaceBodyText pattern failed to compile, leaving body unchanged");
                    text
                }
            }
        } else if all {
            text.replace(find, replace)
        } else {
            text.replacen(find, replace, 1)
        };
        replaced.into_bytes()
    }

    fn patch_body_json(&self, body: &[u8], ops: &[crate::json_patch::PatchOp]) -> Vec<u8> {
        match serde_json::from_slice::<Value>(body) {
            Ok(doc) => {
                let patched = crate::json_patch::apply(&doc, ops);
                serde_json::to_vec(&patched).unwrap_or_else(|_| body.to_vec())
            }
            Err(err) => {
                tracing::warn!(%err, "patchBodyJson body is not valid json, leaving body unchanged");
                body.to_vec()
            }
        }
    }

    /// multipart/form-data is an explicit no-op per §4.3/§9's open question;
    /// only `application/x-www-form-urlencoded` bodies are rewritten.
    fn set_form_field(&self, content_type: Option<&str>, body: &[u8], name: &str, value: Option<&str>) -> Vec<u8> {
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded") => {
                let mut pairs: Vec<(String, String)> =
                    url::form_urlencoded::parse(body).into_owned().collect();
                match value {
                    Some(v) => {
                        if let Some(existing) = pairs.iter_mut().find(|(k, _)| k == name) {
                            existing.1 = v.to_string();
                        } else {
                            pairs.push((name.to_string(), v.to_string()));
                        }
                    }
                    None => pairs.retain(|(k, _)| k != name),
                }
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish()
                    .into_bytes()
            }
            Some(ct) if ct.to_ascii_lowercase().starts_with("multipart/form-data") => {
                tracing::warn!("setFormField/removeFormField is a no-op for multipart/form-data bodies");
                body.to_vec()
            }
            _ => body.to_vec(),
        }
    }

    /// Reserialize the URL's query string and the `Cookie` header once all
    /// actions have been folded, per §4.3's "URL rebuilding" rule.
    fn finalize_request_mutation(&self, ctx: &Request, mutation: &mut RequestMutation) {
        if !mutation.set_query.is_empty() || !mutation.remove_query.is_empty() {
            let base_url = mutation.url.as_deref().unwrap_or(&ctx.url);
            if let Ok(mut parsed) = Url::parse(base_url) {
                let mut merged: Vec<(String, String)> =
                    ctx.query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                for name in &mutation.remove_query {
                    merged.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
                }
                for (name, value) in &mutation.set_query {
                    if let Some(existing) = merged.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                        existing.1 = value.clone();
                    } else {
                        merged.push((name.clone(), value.clone()));
                    }
                }
                if merged.is_empty() {
                    parsed.set_query(None);
                } else {
                    let qs = url::form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(&merged)
                        .finish();
                    parsed.set_query(Some(&qs));
                }
                mutation.url = Some(parsed.to_string());
            }
        }

        if !mutation.set_cookies.is_empty() || !mutation.remove_cookies.is_empty() {
            let mut cookies = ctx.cookies.clone();
            for name in &mutation.remove_cookies {
                cookies.remove(name);
            }
            for (name, value) in &mutation.set_cookies {
                cookies.set(name, value.clone());
            }
            let header_value = crate::model::request::build_cookie_string(&cookies);
            mutation.set_headers.set("Cookie", header_value);
        }
    }
}

/// Apply a computed response mutation onto a response snapshot without
/// talking to CDP — used by the handler to build the *captured* response
/// audit trail for the emitted `NetworkEvent` (§3, §4.4 step 8), which must
/// reflect what was actually sent, not what CDP originally delivered.
pub fn merge_response_snapshot(response: &Response, mutation: &ResponseMutation) -> Response {
    let status = mutation.status.unwrap_or(response.status);
    let headers = merge_headers(response.headers.iter(), &mutation.remove_headers, &mutation.set_headers);
    let body = mutation.body.clone().unwrap_or_else(|| response.body.clone());
    Response::new(status, headers, body)
}

fn merge_headers<'a>(
    base: impl Iterator<Item = (&'a str, &'a str)>,
    remove: &[String],
    set: &HeaderMap,
) -> HeaderMap {
    let mut merged = HeaderMap::new();
    for (k, v) in base {
        merged.set(k, v);
    }
    for name in remove {
        merged.remove(name);
    }
    for (k, v) in set.iter() {
        merged.set(k, v);
    }
    merged
}

fn to_wire_headers(headers: HeaderMap) -> Option<Vec<fetch::HeaderEntry>> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .map(|(name, value)| fetch::HeaderEntry { name: name.to_string(), value: value.to_string() })
            .collect(),
    )
}

/// Best-effort `Fetch.continueRequest` carrying only the `RequestId` — the
/// safety net issued whenever anything upstream failed or was dropped
/// (§4.3 "never omit this — the browser will hang").
pub async fn continue_request(client: &CdpClient, request_id: &str) {
    let params = fetch::ContinueRequestParams {
        request_id: request_id.to_string(),
        ..Default::default()
    };
    if let Err(err) = client.execute(params).await {
        tracing::warn!(%err, request_id, "safety continueRequest failed");
    }
}

/// Best-effort `Fetch.continueResponse` carrying only the `RequestId`.
pub async fn continue_response(client: &CdpClient, request_id: &str) {
    let params = fetch::ContinueResponseParams {
        request_id: request_id.to_string(),
        ..Default::default()
    };
    if let Err(err) = client.execute(params).await {
        tracing::warn!(%err, request_id, "safety continueResponse failed");
    }
}

/// Apply a computed request mutation via CDP (§4.3 "Apply phase"). Every
/// path ends in exactly one resolution call for `request_id`.
pub async fn apply_request_mutation(client: &CdpClient, request_id: &str, ctx: &Request, mutation: &RequestMutation) {
    if let Some(block) = &mutation.block {
        let headers = if block.headers.is_empty() {
            None
        } else {
            Some(
                block
                    .headers
                    .iter()
                    .map(|(k, v)| fetch::HeaderEntry { name: k.clone(), value: v.clone() })
                    .collect(),
            )
        };
        let params = fetch::FulfillRequestParams {
            request_id: request_id.to_string(),
            response_code: block.status,
            response_headers: headers,
            body: base64::engine::general_purpose::STANDARD.encode(&block.body),
        };
        if let Err(err) = client.execute(params).await {
            tracing::warn!(%err, request_id, "fulfillRequest (block) failed, issuing safety continue");
            continue_request(client, request_id).await;
        }
        return;
    }

    if mutation.is_empty() {
        continue_request(client, request_id).await;
        return;
    }

    let headers = to_wire_headers(merge_headers(ctx.headers.iter(), &mutation.remove_headers, &mutation.set_headers));
    let post_data = mutation
        .body
        .as_ref()
        .map(|b| base64::engine::general_purpose::STANDARD.encode(b));
    let params = fetch::ContinueRequestParams {
        request_id: request_id.to_string(),
        url: mutation.url.clone(),
        method: mutation.method.clone(),
        post_data,
        headers,
    };
    if let Err(err) = client.execute(params).await {
        tracing::warn!(%err, request_id, "continueRequest failed, issuing safety continue");
        continue_request(client, request_id).await;
    }
}

/// Apply a computed response mutation via CDP. A body-carrying mutation
/// must go through `fulfillRequest` since `continueResponse` cannot carry
/// one (§4.3).
pub async fn apply_response_mutation(
    client: &CdpClient,
    request_id: &str,
    response: &Response,
    mutation: &ResponseMutation,
) {
    if mutation.is_empty() {
        continue_response(client, request_id).await;
        return;
    }

    if let Some(body) = &mutation.body {
        let status = mutation.status.unwrap_or(response.status);
        let headers =
            to_wire_headers(merge_headers(response.headers.iter(), &mutation.remove_headers, &mutation.set_headers));
        let params = fetch::FulfillRequestParams {
            request_id: request_id.to_string(),
            response_code: status,
            response_headers: headers,
            body: base64::engine::general_purpose::STANDARD.encode(body),
        };
        if let Err(err) = client.execute(params).await {
            tracing::warn!(%err, request_id, "fulfillRequest (response) failed, issuing safety continue");
            continue_response(client, request_id).await;
        }
        return;
    }

    let headers =
        to_wire_headers(merge_headers(response.headers.iter(), &mutation.remove_headers, &mutation.set_headers));
    let params = fetch::ContinueResponseParams {
        request_id: request_id.to_string(),
        response_code: mutation.status,
        response_phrase: None,
        response_headers: headers,
    };
    if let Err(err) = client.execute(params).await {
        tracing::warn!(%err, request_id, "continueResponse failed, issuing safety continue");
        continue_response(client, request_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderMap as HM, LowerMap, RequestId, ResourceType, Rule, Stage};
    use std::sync::Arc as StdArc;

    fn base_ctx(url: &str, body: &[u8]) -> Request {
        Request {
            request_id: RequestId::new("r1"),
            url: url.to_string(),
            method: "GET".to_string(),
            resource_type: ResourceType::Xhr,
            headers: HM::new(),
            query: LowerMap::new(),
            cookies: LowerMap::new(),
            body: body.to_vec(),
        }
    }

    fn matched_rule(actions: Vec<Action>, priority: i32) -> MatchedRule {
        MatchedRule {
            rule: StdArc::new(Rule {
                id: crate::model::RuleId::new("r"),
                name: "r".into(),
                enabled: true,
                priority,
                stage: Stage::Request,
                r#match: Default::default(),
                actions,
            }),
        }
    }

    #[test]
    fn block_is_terminal() {
        let exec = ActionExecutor::new(StdArc::new(RegexCache::new()));
        let ctx = base_ctx("https://example.com/block", b"");
        let matched = vec![matched_rule(
            vec![
                Action::Block { status: 403, headers: Default::default(), body: "no".into() },
                Action::SetHeader { name: "X-Should-Not-Apply".into(), value: "x".into() },
            ],
            1,
        )];
        let mutation = exec.execute_request(&ctx, &matched);
        assert!(mutation.block.is_some());
        assert!(mutation.set_headers.is_empty());
    }

    #[test]
    fn header_injection_pass_through() {
        let exec = ActionExecutor::new(StdArc::new(RegexCache::new()));
        let ctx = base_ctx("https://api.example.com/v1", b"");
        let matched = vec![matched_rule(
            vec![Action::SetHeader { name: "X-Trace".into(), value: "abc".into() }],
            1,
        )];
        let mutation = exec.execute_request(&ctx, &matched);
        assert_eq!(mutation.set_headers.get("X-Trace"), Some("abc"));
        assert!(!mutation.is_empty());
    }

    #[test]
    fn query_param_rewrite_reserializes_url() {
        let exec = ActionExecutor::new(StdArc::new(RegexCache::new()));
        let ctx = base_ctx("https://x/y?a=1", b"");
        let matched = vec![matched_rule(
            vec![Action::SetQueryParam { name: "b".into(), value: "2".into() }],
            1,
        )];
        let mutation = exec.execute_request(&ctx, &matched);
        let url = mutation.url.unwrap();
        assert!(url.contains("a=1"));
        assert!(url.contains("b=2"));
    }

    #[test]
    fn json_patch_response_body() {
        let exec = ActionExecutor::new(StdArc::new(RegexCache::new()));
        let matched = vec![matched_rule(
            vec![Action::PatchBodyJson {
                ops: vec![crate::json_patch::PatchOp::Replace {
                    path: "/status".into(),
                    value: serde_json::json!("ok"),
                }],
            }],
            1,
        )];
        let mutation = exec.execute_response(None, br#"{"status":"bad"}"#, &matched, false);
        let body = mutation.body.unwrap();
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["status"], "ok");
    }

    #[test]
    fn multipart_form_field_is_noop() {
        let exec = ActionExecutor::new(StdArc::new(RegexCache::new()));
        let mut ctx = base_ctx("https://x/y", b"original");
        ctx.headers.set("content-type", "multipart/form-data; boundary=abc");
        let matched = vec![matched_rule(
            vec![Action::SetFormField { name: "a".into(), value: "1".into() }],
            1,
        )];
        let mutation = exec.execute_request(&ctx, &matched);
        assert_eq!(mutation.body.as_deref(), Some("original".as_bytes()));
    }
}
