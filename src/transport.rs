/// A message the Connection hands to its outbound channel (§4.4 "Outbound
/// send is serialized per-connection: single writer"). `Text` carries
/// ordinary application traffic — replies, pushes, pings. `Close` asks the
/// transport task to send a genuine WebSocket close frame carrying the
/// protocol-level code chosen by §4.1/§4.4/§4.6 (4001/4002/1000/…), rather
/// than just dropping the TCP socket with no code the peer can observe.
///
/// Both variants flow through the same single-writer channel, so a `Close`
/// queued after pending `Text` frames is still sent after them — the client
/// sees whatever was in flight before the connection closes.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

impl OutboundFrame {
    pub fn text(s: impl Into<String>) -> Self {
        OutboundFrame::Text(s.into())
    }
}
