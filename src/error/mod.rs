use thiserror::Error;

/// Error taxonomy for the channel core (§7). Every variant knows how it
/// propagates: logged-and-continued, surfaced as an `Error` frame, or a close
/// with a specific code — see `close_code` and `client_status`.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("invalid utf-8 bytes")]
    InvalidUtf8,

    #[error("malformed envelope: {0}")]
    ProtocolError(String),

    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("token missing")]
    TokenMissing,

    #[error("token invalid")]
    TokenInvalid,

    #[error("token expired")]
    TokenExpired,

    #[error("pings missed threshold reached")]
    PingsMissed,

    #[error("service reported an error: {status}: {reason}")]
    ServiceReportable { status: u16, reason: String },

    #[error("service request could not be parsed: {0}")]
    ServiceParsing(String),

    #[error("internal service error")]
    ServiceInternal,

    #[error("send failed: stream terminated")]
    SendFailed,

    #[error("hook failed: {0}")]
    HookFailed(String),

    #[error("runtime error during client invoke: {0}")]
    InvokeRuntimeError(String),

    #[error("runtime error in background ping: {0}")]
    PingRuntimeError(String),

    #[error("unhandled error: {0}")]
    UnhandledError(String),
}

pub type WsResult<T> = Result<T, WsError>;

/// Close code to use when this error must tear down the connection, if any.
/// Errors that are only ever surfaced as an `Error` frame (§7 "Surfaced to the
/// client as Error") return `None` here.
impl WsError {
    pub fn close_code(&self) -> Option<u16> {
        match self {
            WsError::InvalidUtf8 => Some(4001),
            WsError::PingsMissed => Some(4002),
            WsError::AuthenticationFailure
            | WsError::TokenMissing
            | WsError::TokenInvalid
            | WsError::TokenExpired
            | WsError::HandshakeFailure(_) => Some(1000),
            WsError::InvokeRuntimeError(_) => Some(3701),
            WsError::PingRuntimeError(_) => Some(3702),
            WsError::UnhandledError(_) => Some(3703),
            _ => None,
        }
    }

    /// HTTP-like status to put in an `Error` frame's `meta.status`, for the
    /// errors that are surfaced to the client without closing the connection.
    pub fn client_status(&self) -> Option<u16> {
        match self {
            WsError::ServiceReportable { status, .. } => Some(*status),
            WsError::ServiceParsing(_) => Some(400),
            WsError::ServiceInternal => Some(500),
            WsError::InvalidUtf8 => Some(422),
            WsError::ProtocolError(_) => Some(400),
            _ => None,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            WsError::ServiceReportable { reason, .. } => reason.clone(),
            WsError::ServiceParsing(_) => "I/O processing error".to_string(),
            WsError::ServiceInternal => "Internal server error".to_string(),
            WsError::InvalidUtf8 => "Invalid UTF-8 bytes".to_string(),
            other => other.to_string(),
        }
    }

    /// True for errors that are recovered locally: logged and the connection
    /// (or delivery attempt) continues without client-visible effect.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WsError::HookFailed(_) | WsError::SendFailed)
    }
}

impl From<serde_json::Error> for WsError {
    fn from(e: serde_json::Error) -> Self {
        WsError::ProtocolError(e.to_string())
    }
}

impl From<std::io::Error> for WsError {
    fn from(e: std::io::Error) -> Self {
        WsError::SendFailed.log_io(e)
    }
}

impl WsError {
    fn log_io(self, e: std::io::Error) -> Self {
        tracing::debug!(error = ?e, "io error mapped to SendFailed");
        self
    }
}
