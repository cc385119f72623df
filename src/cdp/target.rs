//! The DevTools HTTP discovery endpoint (§6): `GET <devtoolsURL>/json/list`.
//! Not part of the CDP JSON-RPC wire protocol proper — plain HTTP/JSON,
//! fetched once per `AttachTarget` call.

use serde::Deserialize;

/// One entry of the `/json/list` response. Only `type == "page"` entries
/// are interception candidates (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// Fetch and parse `/json/list` from a DevTools HTTP endpoint. Used both
/// as `StartSession`'s connectivity probe and by `AttachTarget` to resolve
/// a target id to its per-target WebSocket URL (§4.7, §4.8).
pub async fn list_targets(devtools_url: &str) -> Result<Vec<TargetInfo>, reqwest::Error> {
    let url = format!("{}/json/list", devtools_url.trim_end_matches('/'));
    reqwest::get(url).await?.json::<Vec<TargetInfo>>().await
}
