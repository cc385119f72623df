use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::ids::RequestId;

/// Normalized resource type, independent of however the browser or the URL
/// itself happen to spell it (§6 "Resource-type normalization").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Fetch,
    Websocket,
    Other,
}

impl ResourceType {
    /// Infer from the request URL's extension first, falling back to the
    /// CDP-reported type, defaulting to `Other`.
    ///
    /// The URL is tried first because CDP's own `resourceType` for, say, a
    /// `fetch()`-initiated script load is `"Fetch"`, which would otherwise
    /// mask the fact that it's serving a `.js` file.
    pub fn normalize(url: &str, cdp_type: &str) -> Self {
        if let Some(ext) = extension_of(url) {
            if let Some(rt) = from_extension(&ext) {
                return rt;
            }
        }
        from_cdp_type(cdp_type)
    }
}

fn extension_of(url: &str) -> Option<String> {
    let without_hash = url.split('#').next().unwrap_or(url);
    let without_query = without_hash.split('?').next().unwrap_or(without_hash);
    let path = without_query.rsplit('/').next().unwrap_or(without_query);
    path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

fn from_extension(ext: &str) -> Option<ResourceType> {
    Some(match ext {
        "js" | "mjs" => ResourceType::Script,
        "css" => ResourceType::Stylesheet,
        "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => ResourceType::Image,
        "woff" | "woff2" | "ttf" => ResourceType::Font,
        "mp4" | "mp3" => ResourceType::Media,
        _ => return None,
    })
}

fn from_cdp_type(cdp_type: &str) -> ResourceType {
    match cdp_type.to_ascii_lowercase().as_str() {
        "document" => ResourceType::Document,
        "stylesheet" => ResourceType::Stylesheet,
        "image" => ResourceType::Image,
        "media" => ResourceType::Media,
        "font" => ResourceType::Font,
        "script" => ResourceType::Script,
        "xhr" => ResourceType::Xhr,
        "fetch" => ResourceType::Fetch,
        "websocket" | "eventsource" => ResourceType::Websocket,
        _ => ResourceType::Other,
    }
}

/// A case-insensitive header map that preserves the casing of the last
/// write but looks up keys lowercase-normalized, matching §3's
/// "case-insensitive mapping from name to single value — last-write-wins".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMap {
    entries: HashMap<String, (String, String)>, // lower-key -> (orig-key, value)
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Self::new();
        for (k, v) in pairs {
            map.set(k.into(), v.into());
        }
        map
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        self.entries.insert(key, (name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(&name.to_ascii_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A lowercase-keyed string map, used for the query and cookie views
/// derived from the URL/`Cookie` header (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LowerMap {
    entries: HashMap<String, String>,
}

impl LowerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(&name.to_ascii_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The materialized request snapshot the rule engine evaluates against and
/// the audit trail captures (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub url: String,
    pub method: String,
    pub resource_type: ResourceType,
    pub headers: HeaderMap,
    pub query: LowerMap,
    pub cookies: LowerMap,
    pub body: Vec<u8>,
}

impl Request {
    /// Parse query parameters and cookies from the URL and `Cookie` header
    /// respectively. Called once per request at context-build time (§3).
    pub fn build(
        request_id: RequestId,
        url: String,
        method: String,
        cdp_resource_type: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Self {
        let query = parse_query(&url);
        let cookies = headers
            .get("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        let resource_type = ResourceType::normalize(&url, cdp_resource_type);
        Self {
            request_id,
            url,
            method,
            resource_type,
            headers,
            query,
            cookies,
            body,
        }
    }

    pub fn body_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

pub fn parse_query(url: &str) -> LowerMap {
    let mut map = LowerMap::new();
    if let Ok(parsed) = Url::parse(url) {
        for (k, v) in parsed.query_pairs() {
            map.set(k.as_ref(), v.into_owned());
        }
    }
    map
}

/// Parse a `Cookie` header's `k=v; k2=v2` pairs into a lowercase-keyed map.
pub fn parse_cookie_header(header: &str) -> LowerMap {
    let mut map = LowerMap::new();
    for part in header.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((k, v)) = part.split_once('=') {
            map.set(k.trim(), v.trim().to_string());
        }
    }
    map
}

/// Serialize a cookie map back into a `Cookie` header value. Pairs are
/// joined by `; ` in the map's iteration order, which for `LowerMap`
/// (backed by a `HashMap`) is not literally insertion order, but is stable
/// for a fixed cookie set within a process run; callers needing a
/// guaranteed byte-identical round trip should compare parsed maps, not
/// the raw string (§8 "Cookie parse -> BuildCookieString -> parse is
/// idempotent on the underlying mapping").
pub fn build_cookie_string(cookies: &LowerMap) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_prefers_url_extension() {
        assert_eq!(
            ResourceType::normalize("https://x/app.js?v=2", "Fetch"),
            ResourceType::Script
        );
        assert_eq!(
            ResourceType::normalize("https://x/app.css#frag", "Other"),
            ResourceType::Stylesheet
        );
    }

    #[test]
    fn resource_type_falls_back_to_cdp_type() {
        assert_eq!(
            ResourceType::normalize("https://x/api/v1", "XHR"),
            ResourceType::Xhr
        );
        assert_eq!(
            ResourceType::normalize("https://x/unknown", "Ping"),
            ResourceType::Other
        );
    }

    #[test]
    fn cookie_round_trip_is_idempotent_on_the_map() {
        let original = parse_cookie_header("a=1; b=2; c=3");
        let built = build_cookie_string(&original);
        let reparsed = parse_cookie_header(&built);
        assert_eq!(original.get("a"), reparsed.get("a"));
        assert_eq!(original.get("b"), reparsed.get("b"));
        assert_eq!(original.get("c"), reparsed.get("c"));
    }

    #[test]
    fn header_map_lookup_is_case_insensitive_and_last_write_wins() {
        let mut h = HeaderMap::new();
        h.set("X-Trace", "a");
        h.set("x-trace", "b");
        assert_eq!(h.get("X-TRACE"), Some("b"));
        assert_eq!(h.len(), 1);
    }
}
