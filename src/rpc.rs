//! The CDP JSON-RPC envelope: call ids, method identifiers, commands,
//! responses and the response/event union, in the shape
//! `chromiumoxide_types` established. Hand-authored here instead of
//! depending on the generated `chromiumoxide_types`/`chromiumoxide_cdp`
//! crates — see DESIGN.md for why.

use std::borrow::Cow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(usize);

impl CallId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

/// A method identifier like `Fetch.continueRequest`.
pub trait Method {
    fn identifier(&self) -> Cow<'static, str>;

    fn domain_name(&self) -> Cow<'static, str> {
        self.split().0
    }

    fn method_name(&self) -> Cow<'static, str> {
        self.split().1
    }

    fn split(&self) -> (Cow<'static, str>, Cow<'static, str>) {
        let id = self.identifier();
        let mut iter = id.split('.');
        let domain = iter.next().unwrap_or_default().to_string();
        let method = iter.next().unwrap_or_default().to_string();
        (Cow::Owned(domain), Cow::Owned(method))
    }
}

pub trait Command: Serialize + Method {
    type Response: DeserializeOwned + fmt::Debug;
}

pub trait Event: Method + DeserializeOwned + Send + 'static {
    fn session_id(&self) -> Option<&str>;
}

/// A message sent to the chromium instance.
#[derive(Debug, Serialize)]
pub struct MethodCall {
    pub id: CallId,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
}

/// A response to a [`MethodCall`].
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: CallId,
    pub result: Option<serde_json::Value>,
    pub error: Option<ProtocolError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// A raw CDP event envelope: `{method, sessionId, params}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonEventMessage {
    pub method: Cow<'static, str>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub params: serde_json::Value,
}

impl Method for JsonEventMessage {
    fn identifier(&self) -> Cow<'static, str> {
        self.method.clone()
    }
}

impl Event for JsonEventMessage {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Union of what can arrive over the websocket: a reply to one of our
/// calls, or an unsolicited event.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message<T = JsonEventMessage> {
    Response(Response),
    Event(T),
}

pub fn to_command_response<T: Command>(resp: Response) -> Result<T::Response, crate::error::CdpError> {
    if let Some(result) = resp.result {
        Ok(serde_json::from_value(result)?)
    } else if let Some(err) = resp.error {
        Err(crate::error::CdpError::Protocol {
            code: err.code,
            message: err.message,
        })
    } else {
        Err(crate::error::CdpError::NoResponse)
    }
}
