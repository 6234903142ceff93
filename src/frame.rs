use crate::error::WsError;

/// Outcome of applying the UTF-8 policy (§4.1) to a received frame.
pub enum Utf8Outcome {
    /// Frame decoded cleanly; here is the text.
    Ok(String),
    /// Invalid UTF-8 before a session was opened: close with 4001.
    CloseBeforeAuth,
    /// Invalid UTF-8 after a session was opened: reply with an Error frame,
    /// keep the connection open.
    ErrorAfterAuth,
}

/// Apply the channel's UTF-8 policy to a raw frame payload.
///
/// The core deliberately does not rely on the transport's own UTF-8
/// validation — axum/tungstenite normally reject non-UTF-8 text frames at the
/// protocol layer before application code ever sees them. Browsers and most
/// client libraries only ever produce valid UTF-8 text frames, so the
/// practical source of invalid bytes is a hand-rolled or buggy client sending
/// raw bytes inside what it claims is a text frame; this function is where
/// that case is turned into a close-or-error decision that depends on
/// whether a session has already been opened, instead of a
/// transport-level rejection with no client-visible distinction between
/// pre-auth and post-auth.
pub fn apply_utf8_policy(bytes: &[u8], has_session_opened: bool) -> Utf8Outcome {
    match std::str::from_utf8(bytes) {
        Ok(s) => Utf8Outcome::Ok(s.to_string()),
        Err(_) if !has_session_opened => Utf8Outcome::CloseBeforeAuth,
        Err(_) => Utf8Outcome::ErrorAfterAuth,
    }
}

impl From<Utf8Outcome> for Option<WsError> {
    fn from(outcome: Utf8Outcome) -> Self {
        match outcome {
            Utf8Outcome::Ok(_) => None,
            Utf8Outcome::CloseBeforeAuth | Utf8Outcome::ErrorAfterAuth => Some(WsError::InvalidUtf8),
        }
    }
}
