//! Raw framing over the per-target CDP WebSocket (§4.7, §6): serializes
//! queued [`rpc::MethodCall`]s onto the socket and deserializes inbound
//! frames into [`rpc::Message`]. Modeled on chromiumoxide's own
//! `Connection`, generalized to run under either async runtime the crate
//! supports (§9 "coroutine/goroutine-heavy... translate directly to a
//! thread pool") and tuned per §4.7's "16 MiB write buffer" and
//! compression requirement.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_tungstenite::tungstenite::protocol::WebSocketConfig;
use async_tungstenite::tungstenite::Message as WsMessage;
use async_tungstenite::WebSocketStream;
use futures::stream::Stream;
use futures::{SinkExt, StreamExt};

use crate::error::CdpError;
use crate::rpc::{CallId, JsonEventMessage, Message, MethodCall};

cfg_if::cfg_if! {
    if #[cfg(feature = "async-std-runtime")] {
        use async_tungstenite::async_std::ConnectStream;
    } else if #[cfg(feature = "tokio-runtime")] {
        use async_tungstenite::tokio::ConnectStream;
    }
}

/// Matches §4.7's "16 MiB write buffer"; read side is left unbounded since
/// response bodies are capped independently by `MaxCaptureSize` (§4.4).
const WRITE_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Exchanges CDP JSON-RPC messages with one target's WebSocket.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Connection {
    pending_commands: VecDeque<MethodCall>,
    ws: WebSocketStream<ConnectStream>,
    next_id: usize,
    needs_flush: bool,
    pending_flush: Option<MethodCall>,
}

impl Connection {
    pub async fn connect(debug_ws_url: impl AsRef<str>) -> Result<Self, CdpError> {
        let config = WebSocketConfig {
            max_write_buffer_size: WRITE_BUFFER_SIZE,
            ..Default::default()
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                let (ws, _) = async_tungstenite::async_std::connect_async_with_config(
                    debug_ws_url.as_ref(),
                    Some(config),
                )
                .await?;
            } else if #[cfg(feature = "tokio-runtime")] {
                let (ws, _) = async_tungstenite::tokio::connect_async_with_config(
                    debug_ws_url.as_ref(),
                    Some(config),
                )
                .await?;
            }
        }

        Ok(Self {
            pending_commands: Default::default(),
            ws,
            next_id: 0,
            needs_flush: false,
            pending_flush: None,
        })
    }

    fn next_call_id(&mut self) -> CallId {
        let id = CallId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Queue `method`/`params` for send and return the id the eventual
    /// [`rpc::Response`] will carry.
    pub fn submit_command(
        &mut self,
        method: std::borrow::Cow<'static, str>,
        params: serde_json::Value,
    ) -> serde_json::Result<CallId> {
        let id = self.next_call_id();
        let call = MethodCall {
            id,
            session_id: None,
            method,
            params,
        };
        self.pending_commands.push_back(call);
        Ok(id)
    }

    fn start_send_next(&mut self, cx: &mut Context<'_>) -> Result<(), CdpError> {
        if self.needs_flush {
            if let Poll::Ready(Ok(())) = self.ws.poll_flush_unpin(cx) {
                self.needs_flush = false;
            }
        }
        if self.pending_flush.is_none() && !self.needs_flush {
            if let Some(cmd) = self.pending_commands.pop_front() {
                tracing::trace!(method = %cmd.method, id = ?cmd.id, "sending cdp command");
                let msg = serde_json::to_string(&cmd)?;
                self.ws.start_send_unpin(WsMessage::text(msg))?;
                self.pending_flush = Some(cmd);
            }
        }
        Ok(())
    }
}

impl Stream for Connection {
    type Item = Result<Message<JsonEventMessage>, CdpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if let Err(err) = pin.start_send_next(cx) {
                return Poll::Ready(Some(Err(err)));
            }
            if let Some(call) = pin.pending_flush.take() {
                if pin.ws.poll_ready_unpin(cx).is_ready() {
                    pin.needs_flush = true;
                    continue;
                } else {
                    pin.pending_flush = Some(call);
                }
            }
            break;
        }

        match ready!(pin.ws.poll_next_unpin(cx)) {
            Some(Ok(WsMessage::Text(text))) => {
                let parsed = serde_json::from_str::<Message<JsonEventMessage>>(&text).map_err(|err| {
                    tracing::debug!(raw = %text, %err, "failed to parse cdp frame");
                    CdpError::from(err)
                });
                Poll::Ready(Some(parsed))
            }
            Some(Ok(WsMessage::Close(_))) | None => Poll::Ready(None),
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Some(Ok(_binary_or_frame)) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Some(Err(err)) => Poll::Ready(Some(Err(CdpError::Ws(err)))),
        }
    }
}
