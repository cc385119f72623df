use std::io;

use async_tungstenite::tungstenite;
use futures::channel::mpsc::SendError;
use futures::channel::oneshot::Canceled;
use thiserror::Error;

use crate::model::{RequestId, SessionId, TargetId};

/// Transport/protocol-level failures talking to the chromium instance
/// (§7 "Transport failures" / "Protocol call failures"). Never surfaced to
/// the browser — the event path always resolves the paused request and
/// only logs these.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cdp protocol error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("received no response from the chromium instance")]
    NoResponse,
    #[error("command channel closed: {0}")]
    ChannelClosed(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Send(#[from] SendError),
    #[error("{0}")]
    Canceled(#[from] Canceled),
}

impl From<Canceled> for CdpError {
    fn from(err: Canceled) -> Self {
        ChannelError::from(err).into()
    }
}

impl From<SendError> for CdpError {
    fn from(err: SendError) -> Self {
        ChannelError::from(err).into()
    }
}

pub type CdpResult<T> = Result<T, CdpError>;

/// Sentinel errors surfaced to callers of the `Session`/`Service` facade
/// (§6, §7). Distinct from [`CdpError`]: these are the only errors this
/// crate ever returns to the embedding host.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("devtools endpoint unreachable: {0}")]
    DevToolsUnreachable(String),
    #[error("no target attached for this session")]
    NoTargetAttached,
    #[error("target {0} not found")]
    TargetNotFound(TargetId),
    #[error("invalid rule configuration: {0}")]
    InvalidConfig(String),
    #[error("browser start failed: {0}")]
    BrowserStartFailed(String),
    #[error("transport error: {0}")]
    Transport(#[from] CdpError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// An error raised while applying an action-computed mutation to a
/// captured body (base64 decode failure, JSON Patch `test` failure, …).
/// §7: these always leave the working body unchanged and are logged at
/// warn, never propagated.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid utf-8 body: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
