use serde::{Deserialize, Serialize};

use crate::model::request::HeaderMap;

/// The materialized response snapshot available at response stage (§3).
/// `body` may be empty when the oversize-body guard suppressed capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self { status, headers, body }
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }
}
