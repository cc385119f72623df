//! Thread-safe registry of attached CDP target connections (§4.7).

use std::sync::Arc;

use dashmap::DashMap;
use futures::channel::mpsc;
use futures::lock::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::cdp::target::{list_targets, TargetInfo};
use crate::client::CdpClient;
use crate::error::SessionError;
use crate::model::TargetId;
use crate::rpc::JsonEventMessage;

/// One attached target: its CDP client handle, the raw event stream the
/// [`crate::interceptor_loop`] consumes, and a context derived from the
/// owning `Session`'s context (§3, §4.7).
pub struct TargetSession {
    pub target_id: TargetId,
    pub client: CdpClient,
    pub cancel: CancellationToken,
    events: AsyncMutex<Option<mpsc::UnboundedReceiver<JsonEventMessage>>>,
}

impl TargetSession {
    /// Take the event stream exactly once. `None` on every call after the
    /// first — used by the caller to detect an idempotent re-attach (the
    /// interceptor loop for this target is already running) versus a fresh
    /// attach that still needs one spawned (§4.7 "Idempotent on re-attach").
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<JsonEventMessage>> {
        self.events.lock().await.take()
    }
}

#[derive(Default)]
pub struct TargetManager {
    targets: DashMap<TargetId, Arc<TargetSession>>,
    /// Reverse `client id -> TargetId` map, giving the handler an O(1)
    /// lookup from a `CdpClient` handle back to the target it belongs to
    /// (§4.7), without needing the caller to thread a `TargetId` through
    /// every paused-event dispatch.
    by_client: DashMap<u64, TargetId>,
}

impl TargetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `/json/list`, resolve `target_id` (or the first page-type
    /// target if absent), dial its WebSocket, and register it. Re-attaching
    /// an already-attached target is a no-op that returns the existing
    /// session (§4.7).
    pub async fn attach_target(
        &self,
        devtools_url: &str,
        target_id: Option<&str>,
        parent_cancel: &CancellationToken,
    ) -> Result<Arc<TargetSession>, SessionError> {
        let targets = list_targets(devtools_url)
            .await
            .map_err(|err| SessionError::DevToolsUnreachable(err.to_string()))?;
        let info = pick_target(&targets, target_id)?;
        let tid = TargetId::new(info.id.clone());

        if let Some(existing) = self.targets.get(&tid) {
            return Ok(Arc::clone(existing.value()));
        }

        let ws_url = info
            .web_socket_debugger_url
            .clone()
            .ok_or_else(|| SessionError::TargetNotFound(tid.clone()))?;
        let (client, events) = CdpClient::connect(&ws_url).await.map_err(SessionError::Transport)?;
        let cancel = parent_cancel.child_token();
        let session = Arc::new(TargetSession {
            target_id: tid.clone(),
            client: client.clone(),
            cancel,
            events: AsyncMutex::new(Some(events)),
        });

        // Another concurrent attach may have won the race; defer to it.
        match self.targets.entry(tid.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => return Ok(Arc::clone(existing.get())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
            }
        }
        self.by_client.insert(client.id(), tid);
        Ok(session)
    }

    /// Cancel the target's child context and drop it from the registry.
    /// Called both by an explicit `DetachTarget` and by the interceptor
    /// loop's stream-closed handler when the tab itself goes away (§4.7).
    pub fn detach_target(&self, target_id: &TargetId) {
        if let Some((_, session)) = self.targets.remove(target_id) {
            session.cancel.cancel();
            self.by_client.remove(&session.client.id());
        }
    }

    pub fn target_id_for_client(&self, client_id: u64) -> Option<TargetId> {
        self.by_client.get(&client_id).map(|entry| entry.clone())
    }

    pub fn get(&self, target_id: &TargetId) -> Option<Arc<TargetSession>> {
        self.targets.get(target_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Every currently attached target, used by `Session::stop` to
    /// best-effort disable interception and detach each one (§4.8).
    pub fn all(&self) -> Vec<Arc<TargetSession>> {
        self.targets.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn pick_target(targets: &[TargetInfo], target_id: Option<&str>) -> Result<TargetInfo, SessionError> {
    match target_id {
        Some(id) => targets
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| SessionError::TargetNotFound(TargetId::new(id))),
        None => targets
            .iter()
            .find(|t| t.is_page())
            .cloned()
            .ok_or(SessionError::NoTargetAttached),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str) -> TargetInfo {
        TargetInfo {
            id: id.to_string(),
            target_type: "page".to_string(),
            url: "https://x/".to_string(),
            title: String::new(),
            web_socket_debugger_url: Some(format!("ws://localhost/devtools/page/{id}")),
        }
    }

    #[test]
    fn picks_first_page_target_when_id_unspecified() {
        let mut service_worker = page("sw-1");
        service_worker.target_type = "service_worker".to_string();
        let targets = vec![service_worker, page("page-1"), page("page-2")];
        let picked = pick_target(&targets, None).unwrap();
        assert_eq!(picked.id, "page-1");
    }

    #[test]
    fn missing_explicit_target_id_is_an_error() {
        let targets = vec![page("page-1")];
        let err = pick_target(&targets, Some("does-not-exist")).unwrap_err();
        assert!(matches!(err, SessionError::TargetNotFound(_)));
    }

    #[test]
    fn no_page_targets_is_no_target_attached() {
        let mut sw = page("sw-1");
        sw.target_type = "service_worker".to_string();
        let err = pick_target(&[sw], None).unwrap_err();
        assert!(matches!(err, SessionError::NoTargetAttached));
    }
}
