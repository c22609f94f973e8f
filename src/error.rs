use rsip::StatusCode;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("missing required feature: {0}")]
    FeatureUnsupported(String),

    #[error("Could not connect to the websocket in time.")]
    WsTimeout,

    #[error("Can not connect while trying to recover.")]
    Recovering,

    #[error("connect was cancelled by disconnect")]
    ConnectCancelled,

    #[error("registrar rejected credentials: {0}")]
    AuthRejected(String),

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("client is not connected")]
    NotConnected,

    #[error("invite failed: {reason}")]
    InviteFailed {
        code: Option<StatusCode>,
        reason: String,
    },

    #[error("re-invite failed: {0}")]
    ReinviteFailed(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("account is misconfigured, hangup cause 58")]
    MisconfiguredAccount,

    #[error("invalid DTMF character: {0:?}")]
    InvalidDtmf(char),

    #[error("session aborted before the operation settled")]
    SessionAborted,

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("SIP message error: {0}")]
    SipMessageError(#[from] rsip::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Channel send error: {0}")]
    ChannelSendError(String),

    #[error("Error: {0}")]
    Error(String),
}

#[cfg(feature = "wasm")]
impl From<Error> for wasm_bindgen::JsValue {
    fn from(e: Error) -> Self {
        e.to_string().into()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelSendError(e.to_string())
    }
}
