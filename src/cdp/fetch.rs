//! `Fetch` domain: the request/response interception surface (§4.3, §6).

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::rpc::{Command, Event, Method};

/// CDP represents headers as an ordered array of `{name, value}` pairs
/// rather than a map, so wire types use this instead of our internal
/// `HeaderMap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStage {
    Request,
    Response,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestPattern {
    #[serde(rename = "urlPattern", skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(rename = "requestStage", skip_serializing_if = "Option::is_none")]
    pub request_stage: Option<RequestStage>,
}

/// `Fetch.enable`. An empty `patterns` list intercepts every request at
/// the request stage only; we always register both stages explicitly
/// (§4.4, §6).
#[derive(Debug, Clone, Serialize)]
pub struct EnableParams {
    pub patterns: Vec<RequestPattern>,
    #[serde(rename = "handleAuthRequests")]
    pub handle_auth_requests: bool,
}

impl Default for EnableParams {
    fn default() -> Self {
        Self {
            patterns: vec![
                RequestPattern {
                    url_pattern: Some("*".to_string()),
                    request_stage: Some(RequestStage::Request),
                },
                RequestPattern {
                    url_pattern: Some("*".to_string()),
                    request_stage: Some(RequestStage::Response),
                },
            ],
            handle_auth_requests: false,
        }
    }
}

impl Method for EnableParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.enable".into()
    }
}

impl Command for EnableParams {
    type Response = serde_json::Value;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DisableParams {}

impl Method for DisableParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.disable".into()
    }
}

impl Command for DisableParams {
    type Response = serde_json::Value;
}

/// `Fetch.requestPaused`, fired at both the request and response stage.
/// `response_status_code`/`response_headers` are present only at the
/// response stage (§4.4).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedEvent {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub request: PausedRequest,
    #[serde(rename = "frameId")]
    pub frame_id: Option<String>,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "networkId")]
    pub network_id: Option<String>,
    pub response_error_reason: Option<String>,
    pub response_status_code: Option<u16>,
    pub response_status_text: Option<String>,
    #[serde(default)]
    pub response_headers: Option<Vec<HeaderEntry>>,
}

impl Method for RequestPausedEvent {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.requestPaused".into()
    }
}

impl Event for RequestPausedEvent {
    fn session_id(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PausedRequest {
    pub url: String,
    pub method: String,
    pub headers: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "postData")]
    pub post_data: Option<String>,
    #[serde(rename = "hasPostData", default)]
    pub has_post_data: bool,
    /// Present instead of `postData` when the browser decided the body was
    /// too large to inline; each entry's `bytes` is base64-encoded (§4.4
    /// "base64-decoded postDataEntries concatenation").
    #[serde(rename = "postDataEntries", default)]
    pub post_data_entries: Option<Vec<PostDataEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostDataEntry {
    pub bytes: Option<String>,
}

/// `Fetch.continueRequest`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContinueRequestParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(rename = "postData", skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<HeaderEntry>>,
}

impl Method for ContinueRequestParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.continueRequest".into()
    }
}

impl Command for ContinueRequestParams {
    type Response = serde_json::Value;
}

/// `Fetch.continueResponse`, used only to change status/headers at the
/// response stage when the body itself is untouched (§4.3). When the
/// body is rewritten we use `fulfillRequest` instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContinueResponseParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "responseCode", skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(rename = "responsePhrase", skip_serializing_if = "Option::is_none")]
    pub response_phrase: Option<String>,
    #[serde(rename = "responseHeaders", skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HeaderEntry>>,
}

impl Method for ContinueResponseParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.continueResponse".into()
    }
}

impl Command for ContinueResponseParams {
    type Response = serde_json::Value;
}

/// `Fetch.fulfillRequest`: answers the paused request/response with a
/// synthetic body, used for both `block` and body-mutating response
/// actions (§4.3).
#[derive(Debug, Clone, Serialize)]
pub struct FulfillRequestParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "responseCode")]
    pub response_code: u16,
    #[serde(rename = "responseHeaders", skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HeaderEntry>>,
    /// base64-encoded body, per CDP's wire format.
    pub body: String,
}

impl Method for FulfillRequestParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.fulfillRequest".into()
    }
}

impl Command for FulfillRequestParams {
    type Response = serde_json::Value;
}

#[derive(Debug, Clone, Serialize)]
pub struct FailRequestParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "errorReason")]
    pub error_reason: String,
}

impl Method for FailRequestParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.failRequest".into()
    }
}

impl Command for FailRequestParams {
    type Response = serde_json::Value;
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResponseBodyParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl Method for GetResponseBodyParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Fetch.getResponseBody".into()
    }
}

impl Command for GetResponseBodyParams {
    type Response = GetResponseBodyResult;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponseBodyResult {
    pub body: String,
    pub base64_encoded: bool,
}
