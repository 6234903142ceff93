use async_trait::async_trait;
use serde_json::Value;

use crate::error::WsError;
use crate::message::ClientMessage;

/// Credentials carried on a `create-session` envelope (§6 `auth_func`).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub secret: Option<String>,
}

/// Context handed to `ServiceInvoker::invoke` — the Rust analogue of the
/// original's `request_dict`/`environ` bundle (everything a host service
/// might legitimately want to know about the calling connection, minus
/// anything the core itself decides, like serialization).
#[derive(Debug, Clone)]
pub struct InvokeContext {
    pub service_name: String,
    pub payload: Value,
    pub pub_client_id: String,
    pub ext_client_id: Option<String>,
    pub ext_client_name: Option<String>,
    pub peer_address: Option<String>,
    pub cid: String,
}

/// The single seam through which the core calls into application services,
/// including the well-known lifecycle/pubsub services named in §6
/// (`zato.channel.web-socket.client.create` and friends are just invocations
/// through this same trait with a well-known `service_name` — there is one
/// host-provided call, not a separate method per lifecycle event).
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    async fn invoke(&self, ctx: InvokeContext) -> Result<Value, WsError>;
}

/// `auth_func` (§6): validates credentials against a named security
/// definition and returns whether they're accepted.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, cid: &str, credentials: &Credentials) -> Result<bool, WsError>;
}

/// A single audit log entry (§4.9).
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub kind: AuditEventKind,
    pub object_id: String,
    pub data: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub msg_id: Option<String>,
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Sent,
    Received,
}

/// Audit log (§4.9). Storage is host-owned; the core only emits events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn store(&self, event: AuditEvent);
    async fn delete_container(&self, pub_client_id: &str);
}

/// Context passed to every hook invocation (§4.11).
#[derive(Debug, Clone)]
pub struct HookContext {
    pub pub_client_id: String,
    pub ext_client_id: Option<String>,
    pub ext_client_name: Option<String>,
    pub connection_time: chrono::DateTime<chrono::Utc>,
    pub peer_address: Option<String>,
    pub peer_fqdn: Option<String>,
}

/// Optional synchronous callbacks into host services, keyed by hook type
/// (§4.11 Hook Invoker). A missing implementation is represented by
/// `NoopHookSink`, not by `Option<dyn HookSink>`, so call sites never branch
/// on presence — they just call through.
#[async_trait]
pub trait HookSink: Send + Sync {
    async fn on_connected(&self, _ctx: HookContext) {}
    async fn on_disconnected(&self, _ctx: HookContext) {}
    async fn on_pubsub_response(&self, _ctx: HookContext, _message: ClientMessage) {}
    async fn on_vault_mount_point_needed(&self, _ctx: HookContext) -> Option<String> {
        None
    }
}

/// A `HookSink` where every hook is a no-op — the "missing hook" case named
/// in §4.11.
pub struct NoopHookSink;

#[async_trait]
impl HookSink for NoopHookSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_hook_sink_on_connected_does_not_panic() {
        let sink = NoopHookSink;
        sink.on_connected(HookContext {
            pub_client_id: "ws.1".into(),
            ext_client_id: None,
            ext_client_name: None,
            connection_time: chrono::Utc::now(),
            peer_address: None,
            peer_fqdn: None,
        })
        .await;
    }

    #[tokio::test]
    async fn noop_hook_sink_vault_mount_point_is_none() {
        let sink = NoopHookSink;
        let result = sink
            .on_vault_mount_point_needed(HookContext {
                pub_client_id: "ws.1".into(),
                ext_client_id: None,
                ext_client_name: None,
                connection_time: chrono::Utc::now(),
                peer_address: None,
                peer_fqdn: None,
            })
            .await;
        assert!(result.is_none());
    }
}
