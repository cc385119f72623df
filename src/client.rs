//! The per-target command/event pump: spawns a task that drives a
//! [`Connection`], resolves in-flight commands against inbound
//! [`rpc::Response`]s, and forwards `Fetch.requestPaused` events onto a
//! channel the [`crate::interceptor_loop::InterceptorLoop`] consumes.
//!
//! This is chromiumoxide's `Browser`/`Handler` split collapsed to a single
//! target, since §4.7 dials one WebSocket per attached target rather than
//! multiplexing sessions over one browser-wide connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};

use crate::conn::Connection;
use crate::error::{CdpError, CdpResult};
use crate::rpc::{self, CallId, Command, JsonEventMessage, Message, Method};

enum Outbound {
    Call {
        method: std::borrow::Cow<'static, str>,
        params: serde_json::Value,
        reply: oneshot::Sender<rpc::Response>,
    },
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A cheap, cloneable handle to one target's CDP connection. `id` gives
/// [`crate::target_manager::TargetManager`] an O(1) reverse lookup from a
/// client handle back to its `TargetId` (§4.7) without requiring the
/// connection itself to be hashable.
#[derive(Clone, Debug)]
pub struct CdpClient {
    id: u64,
    commands: mpsc::UnboundedSender<Outbound>,
}

impl CdpClient {
    /// Dial `debug_ws_url` and spawn the pump task. Returns the client
    /// handle plus the `Fetch.requestPaused` event stream for this target.
    pub async fn connect(
        debug_ws_url: &str,
    ) -> CdpResult<(Self, mpsc::UnboundedReceiver<JsonEventMessage>)> {
        let conn = Connection::connect(debug_ws_url).await?;
        let (command_tx, command_rx) = mpsc::unbounded();
        let (event_tx, event_rx) = mpsc::unbounded();
        crate::spawn::spawn(run_pump(conn, command_rx, event_tx));
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        Ok((Self { id, commands: command_tx }, event_rx))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Execute a single CDP command, awaiting its response.
    pub async fn execute<C: Command>(&self, cmd: C) -> CdpResult<C::Response> {
        let method = cmd.identifier();
        let params = serde_json::to_value(&cmd)?;
        let (reply, recv) = oneshot::channel();
        self.commands
            .unbounded_send(Outbound::Call { method, params, reply })
            .map_err(|_| CdpError::NoResponse)?;
        let resp = recv.await?;
        rpc::to_command_response::<C>(resp)
    }
}

async fn run_pump(
    conn: Connection,
    commands: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<JsonEventMessage>,
) {
    let mut conn = conn.fuse();
    let mut commands = commands.fuse();
    let mut pending: HashMap<CallId, oneshot::Sender<rpc::Response>> = HashMap::new();
    loop {
        futures::select! {
            cmd = commands.next() => {
                match cmd {
                    Some(Outbound::Call { method, params, reply }) => {
                        match conn.get_mut().submit_command(method, params) {
                            Ok(id) => {
                                pending.insert(id, reply);
                            }
                            Err(err) => {
                                tracing::warn!(%err, "failed to encode cdp command");
                            }
                        }
                    }
                    None => break,
                }
            }
            msg = conn.next() => {
                match msg {
                    Some(Ok(Message::Response(resp))) => {
                        if let Some(reply) = pending.remove(&resp.id) {
                            let _ = reply.send(resp);
                        }
                    }
                    Some(Ok(Message::Event(ev))) => {
                        let _ = events.unbounded_send(ev);
                    }
                    Some(Err(err)) => {
                        tracing::warn!(%err, "cdp connection error, stopping pump");
                        break;
                    }
                    None => {
                        tracing::debug!("cdp connection closed");
                        break;
                    }
                }
            }
        }
    }
}
