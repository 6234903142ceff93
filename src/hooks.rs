use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::WsError;
use crate::host::{HookContext, HookSink};
use crate::message::ClientMessage;

/// Thin invoker around a `HookSink` (§4.11). Hooks are host-defined code the
/// core does not control; a panicking or failing hook must never take the
/// connection down with it (§7: "Hook failures: logged, do not close").
pub struct HookInvoker {
    sink: Arc<dyn HookSink>,
}

impl HookInvoker {
    pub fn new(sink: Arc<dyn HookSink>) -> Self {
        Self { sink }
    }

    pub async fn on_connected(&self, ctx: HookContext) {
        self.guard("on_connected", self.sink.on_connected(ctx)).await;
    }

    pub async fn on_disconnected(&self, ctx: HookContext) {
        self.guard("on_disconnected", self.sink.on_disconnected(ctx)).await;
    }

    pub async fn on_pubsub_response(&self, ctx: HookContext, message: ClientMessage) {
        self.guard(
            "on_pubsub_response",
            self.sink.on_pubsub_response(ctx, message),
        )
        .await;
    }

    pub async fn on_vault_mount_point_needed(&self, ctx: HookContext) -> Option<String> {
        match AssertUnwindSafe(self.sink.on_vault_mount_point_needed(ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                let err = WsError::HookFailed("on_vault_mount_point_needed panicked".into());
                tracing::warn!(error = %err, "hook failed");
                None
            }
        }
    }

    async fn guard<F>(&self, name: &str, fut: F)
    where
        F: std::future::Future<Output = ()>,
    {
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            let err = WsError::HookFailed(format!("{name} panicked"));
            tracing::warn!(hook = name, error = %err, "hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct PanickingSink;

    #[async_trait]
    impl HookSink for PanickingSink {
        async fn on_connected(&self, _ctx: HookContext) {
            panic!("boom");
        }
    }

    fn ctx() -> HookContext {
        HookContext {
            pub_client_id: "ws.1".into(),
            ext_client_id: None,
            ext_client_name: None,
            connection_time: chrono::Utc::now(),
            peer_address: None,
            peer_fqdn: None,
        }
    }

    #[tokio::test]
    async fn a_panicking_hook_does_not_propagate() {
        let invoker = HookInvoker::new(Arc::new(PanickingSink));
        invoker.on_connected(ctx()).await;
    }

    #[tokio::test]
    async fn noop_sink_hooks_all_complete_quietly() {
        let invoker = HookInvoker::new(Arc::new(crate::host::NoopHookSink));
        invoker.on_connected(ctx()).await;
        invoker.on_disconnected(ctx()).await;
        assert!(invoker.on_vault_mount_point_needed(ctx()).await.is_none());
    }
}
