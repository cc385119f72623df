use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::request::HeaderMap;

/// The exhaustive action variant set from §4.3. Unknown action types
/// deserialize into `Unknown` and are always a no-op (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "setUrl")]
    SetUrl { value: String },
    #[serde(rename = "setMethod")]
    SetMethod { value: String },
    #[serde(rename = "setHeader")]
    SetHeader { name: String, value: String },
    #[serde(rename = "removeHeader")]
    RemoveHeader { name: String },
    #[serde(rename = "setQueryParam")]
    SetQueryParam { name: String, value: String },
    #[serde(rename = "removeQueryParam")]
    RemoveQueryParam { name: String },
    #[serde(rename = "setCookie")]
    SetCookie { name: String, value: String },
    #[serde(rename = "removeCookie")]
    RemoveCookie { name: String },
    #[serde(rename = "setBody")]
    SetBody {
        value: String,
        #[serde(default)]
        encoding: Option<Encoding>,
    },
    #[serde(rename = "replaceBodyText")]
    ReplaceBodyText {
        find: String,
        replace: String,
        /// When set, `find` is interpreted as a cached regex pattern
        /// instead of a literal substring.
        #[serde(default)]
        pattern: bool,
        #[serde(default)]
        all: bool,
    },
    #[serde(rename = "patchBodyJson")]
    PatchBodyJson { ops: Vec<crate::json_patch::PatchOp> },
    #[serde(rename = "setFormField")]
    SetFormField { name: String, value: String },
    #[serde(rename = "removeFormField")]
    RemoveFormField { name: String },
    #[serde(rename = "setStatus")]
    SetStatus { value: u16 },
    #[serde(rename = "block")]
    Block {
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Base64,
}

/// The request-stage mutation an `ActionExecutor::execute_request` pass
/// accumulates (§4.3). `None` fields mean "leave alone".
#[derive(Debug, Clone, Default)]
pub struct RequestMutation {
    pub url: Option<String>,
    pub method: Option<String>,
    pub set_headers: HeaderMap,
    pub remove_headers: Vec<String>,
    pub set_query: HashMap<String, String>,
    pub remove_query: Vec<String>,
    pub set_cookies: HashMap<String, String>,
    pub remove_cookies: Vec<String>,
    pub body: Option<Vec<u8>>,
    pub block: Option<BlockPayload>,
}

impl RequestMutation {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.method.is_none()
            && self.set_headers.is_empty()
            && self.remove_headers.is_empty()
            && self.set_query.is_empty()
            && self.remove_query.is_empty()
            && self.set_cookies.is_empty()
            && self.remove_cookies.is_empty()
            && self.body.is_none()
            && self.block.is_none()
    }

    pub fn touches_query_or_cookies(&self) -> bool {
        !self.set_query.is_empty()
            || !self.remove_query.is_empty()
            || !self.set_cookies.is_empty()
            || !self.remove_cookies.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BlockPayload {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// The response-stage mutation an `ActionExecutor::execute_response` pass
/// accumulates (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ResponseMutation {
    pub status: Option<u16>,
    pub set_headers: HeaderMap,
    pub remove_headers: Vec<String>,
    pub body: Option<Vec<u8>>,
}

impl ResponseMutation {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.set_headers.is_empty()
            && self.remove_headers.is_empty()
            && self.body.is_none()
    }
}
