//! Drains one target's `Fetch.requestPaused` event stream, submits each
//! paused event into the bounded worker pool, and falls back to a direct
//! resolution when the pool is saturated (§4.5, §4.7). A panicking handler
//! is caught at this boundary — a bug in one request's rule evaluation
//! must never take the whole loop down with it (§5).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::action_executor;
use crate::cdp::fetch;
use crate::client::CdpClient;
use crate::handler::{self, Handler};
use crate::model::{Stage, TargetId};
use crate::rpc::JsonEventMessage;
use crate::target_manager::TargetManager;
use crate::worker_pool::WorkerPool;

enum Next {
    Cancelled,
    Closed,
    Event(JsonEventMessage),
}

/// Spawn the consumption loop for one target's event stream. Runs until
/// `cancel` fires or the underlying connection closes (the tab navigated
/// away or was closed out from under us). On the latter, the target is
/// removed from `targets` and a warning is logged — nothing else would
/// ever notice the tab is gone (§4.6, §3).
pub fn spawn_loop(
    client: CdpClient,
    target_id: TargetId,
    mut events: mpsc::UnboundedReceiver<JsonEventMessage>,
    handler: Arc<Handler>,
    pool: Arc<WorkerPool>,
    targets: Arc<TargetManager>,
    cancel: CancellationToken,
) {
    crate::spawn::spawn(async move {
        loop {
            let next = futures::select! {
                _ = cancel.cancelled().fuse() => Next::Cancelled,
                msg = events.next().fuse() => match msg {
                    Some(msg) => Next::Event(msg),
                    None => Next::Closed,
                },
            };
            let msg = match next {
                Next::Cancelled => break,
                Next::Closed => {
                    if !cancel.is_cancelled() {
                        tracing::warn!(target_id = %target_id, "cdp event stream closed, tab is gone, detaching target");
                        targets.detach_target(&target_id);
                    }
                    break;
                }
                Next::Event(msg) => msg,
            };
            if msg.method.as_ref() != "Fetch.requestPaused" {
                continue;
            }
            let event: fetch::RequestPausedEvent = match serde_json::from_value(msg.params) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(%err, "failed to decode Fetch.requestPaused, dropping");
                    continue;
                }
            };

            let stage = handler::detect_stage(&event);
            let request_id = event.request_id.clone();
            let request_id_for_task = request_id.clone();
            let handler = Arc::clone(&handler);
            let client_for_task = client.clone();
            let target_for_task = target_id.clone();

            let submitted = pool.submit(async move {
                let outcome = AssertUnwindSafe(handler.handle(client_for_task, target_for_task, event))
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    tracing::error!(request_id = %request_id_for_task, "handler panicked while processing a paused request");
                }
            });

            if !submitted {
                tracing::warn!(request_id = %request_id, "worker pool saturated, issuing direct degradation continue");
                match stage {
                    Stage::Request => action_executor::continue_request(&client, &request_id).await,
                    Stage::Response => action_executor::continue_response(&client, &request_id).await,
                }
            }
        }
        tracing::debug!(target_id = %target_id, "interceptor loop exited");
    });
}
