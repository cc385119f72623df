use std::borrow::Cow;

use serde::Serialize;

use crate::rpc::Method;

/// `Network.enable` with no parameters of interest to us — enabling the
/// domain is what makes `request.resourceType` resolvable from CDP's own
/// type hints, which we use as the fallback in [`crate::model::ResourceType::normalize`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnableParams {}

impl Method for EnableParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Network.enable".into()
    }
}

impl crate::rpc::Command for EnableParams {
    type Response = serde_json::Value;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DisableParams {}

impl Method for DisableParams {
    fn identifier(&self) -> Cow<'static, str> {
        "Network.disable".into()
    }
}

impl crate::rpc::Command for DisableParams {
    type Response = serde_json::Value;
}
