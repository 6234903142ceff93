use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use std::panic::AssertUnwindSafe;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::connection::{Connection, HostServices, PeerInfo};
use crate::delivery::PubSubMessage;
use crate::error::WsError;
use crate::transport::OutboundFrame;

/// Everything `ChannelServer::new` needs: the channel's own configuration
/// plus the host collaborators every `Connection` is given (§6).
pub struct ChannelServerConfig {
    pub config: Arc<Config>,
    pub host: Arc<HostServices>,
}

/// The Channel Server (J): owns the listener and the registry of live
/// connections, and is the entry point for host-initiated operations —
/// `invoke_client`, `broadcast`, `disconnect_client`, `notify_pubsub_message`,
/// `subscribe_to_topic`, `get_client_by_pub_id` (§4.10).
///
/// The connection registry is a plain `Arc<RwLock<HashMap<_, _>>>` keyed by
/// connection identity, holding a full `Arc<Connection>` handle per entry so
/// host operations can reach the whole Connection Object, not just its
/// outbound channel.
pub struct ChannelServer {
    config: Arc<Config>,
    host: Arc<HostServices>,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    broadcast_semaphore: Semaphore,
}

impl ChannelServer {
    pub fn new(cfg: ChannelServerConfig) -> Arc<Self> {
        let permits = cfg.config.broadcast_concurrency.min(256).max(1);
        Arc::new(ChannelServer {
            config: cfg.config,
            host: cfg.host,
            connections: RwLock::new(HashMap::new()),
            broadcast_semaphore: Semaphore::new(permits),
        })
    }

    /// The axum router for this channel: a single upgrade route at
    /// `config.path`. A request that doesn't carry the WebSocket upgrade
    /// headers is rejected with 400 by `WebSocketUpgrade`'s own extractor
    /// before `ws_upgrade` runs; a request to any other path falls through to
    /// axum's default 404 (§6 "listener").
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(&self.config.path, get(ws_upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    async fn register(&self, conn: Arc<Connection>) {
        self.connections
            .write()
            .await
            .insert(conn.pub_client_id.clone(), conn);
    }

    async fn unregister(&self, pub_client_id: &str) {
        self.connections.write().await.remove(pub_client_id);
    }

    pub async fn get_client_by_pub_id(&self, pub_client_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(pub_client_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Closes a connection, idempotently (§4.4, §8 "disconnect_client is
    /// idempotent" — `Connection::close` already guards repeats).
    pub async fn disconnect_client(&self, pub_client_id: &str, cause: WsError) -> bool {
        match self.get_client_by_pub_id(pub_client_id).await {
            Some(conn) => {
                conn.close(cause).await;
                self.unregister(pub_client_id).await;
                true
            }
            None => false,
        }
    }

    /// Request/response against a single client (§4.7), using the channel's
    /// configured correlator timeout unless the caller overrides it.
    pub async fn invoke_client(
        &self,
        pub_client_id: &str,
        request: Value,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, WsError> {
        let conn = self
            .get_client_by_pub_id(pub_client_id)
            .await
            .ok_or(WsError::SendFailed)?;
        conn.invoke_client(request, timeout.unwrap_or(self.config.correlator_timeout))
            .await
    }

    /// Records that `pub_client_id` now owns `sub_key` (§4.8), so a later
    /// `notify_pubsub_message` for that key reaches it.
    pub async fn subscribe_to_topic(&self, pub_client_id: &str, sub_key: String) -> Result<(), WsError> {
        let conn = self
            .get_client_by_pub_id(pub_client_id)
            .await
            .ok_or(WsError::SendFailed)?;
        conn.add_sub_key(sub_key).await;
        Ok(())
    }

    pub async fn unsubscribe_from_topic(&self, pub_client_id: &str, sub_key: &str) {
        if let Some(conn) = self.get_client_by_pub_id(pub_client_id).await {
            conn.remove_sub_key(sub_key).await;
        }
    }

    /// Delivers a batch of pub/sub messages to a single known client
    /// (§4.8). Ordering within the batch is handled by `Connection::deliver_pubsub`.
    pub async fn notify_pubsub_message(
        &self,
        pub_client_id: &str,
        messages: Vec<PubSubMessage>,
    ) -> Result<(), WsError> {
        let conn = self
            .get_client_by_pub_id(pub_client_id)
            .await
            .ok_or(WsError::SendFailed)?;
        conn.deliver_pubsub(messages).await
    }

    /// Fans a pub/sub batch out to every currently-connected client that owns
    /// `sub_key` (§9 Open Question c). Concurrency is capped by
    /// `broadcast_semaphore` so a topic with many subscribers can't spawn an
    /// unbounded number of simultaneous deliveries.
    ///
    /// This is pub/sub delivery to a subscriber set, not J's `broadcast`
    /// operation (§4.10) — see `broadcast` below for the unconditional,
    /// fire-and-forget fan-out to every connected client.
    pub async fn deliver_to_subscribers(&self, sub_key: &str, messages: Vec<PubSubMessage>) -> usize {
        let targets: Vec<Arc<Connection>> = {
            let connections = self.connections.read().await;
            let mut out = Vec::new();
            for conn in connections.values() {
                if conn.owns_sub_key(sub_key).await {
                    out.push(conn.clone());
                }
            }
            out
        };

        let mut delivered = 0;
        let mut tasks = Vec::with_capacity(targets.len());
        for conn in targets {
            let permit = match self.broadcast_semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let batch = messages.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                conn.deliver_pubsub(batch).await.is_ok()
            }));
        }
        for task in tasks {
            if let Ok(true) = task.await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Fans `request` out to literally every connected client as an
    /// `InvokeClient` request, without waiting for any reply (§4.10,
    /// glossary "Fan-out (broadcast)"). Concurrency is capped by
    /// `broadcast_semaphore`, the same bound used for subscriber delivery.
    pub async fn broadcast(&self, request: Value) -> usize {
        let targets: Vec<Arc<Connection>> = self.connections.read().await.values().cloned().collect();

        let mut delivered = 0;
        let mut tasks = Vec::with_capacity(targets.len());
        for conn in targets {
            let permit = match self.broadcast_semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let request = request.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                conn.send_invoke_client_fire_and_forget(request).await.is_ok()
            }));
        }
        for task in tasks {
            if let Ok(true) = task.await {
                delivered += 1;
            }
        }
        delivered
    }
}

async fn ws_upgrade(
    State(server): State<Arc<ChannelServer>>,
    ws: WebSocketUpgrade,
    headers: axum::http::HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let peer = PeerInfo {
        peer_address: Some(addr.to_string()),
        local_address: None,
        forwarded_for: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        peer_fqdn: None,
        forwarded_for_fqdn: None,
    };
    ws.on_upgrade(move |socket| async move {
        server.handle_socket(socket, peer).await;
    })
}

impl ChannelServer {
    /// Drives one accepted connection end to end: build the Connection
    /// Object, spawn its watchdog, split the socket into a forwarding task
    /// (outbound channel → socket) and a reader loop (socket → dispatch).
    async fn handle_socket(self: Arc<Self>, socket: WebSocket, peer: PeerInfo) {
        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();

        let conn = Connection::new(self.config.clone(), self.host.clone(), peer, outbound_tx);
        self.register(conn.clone()).await;
        conn.spawn_watchdog();

        let forward = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    OutboundFrame::Close { code, reason } => {
                        let _ = sink
                            .send(WsMessage::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        });

        // Races the socket read against a close decided on another task
        // (pinger, watchdog) so that path's disconnect is visible here
        // within one suspension cycle (§5), not only on the connection's
        // next inbound frame.
        let closed_notify = conn.closed_notify();
        let mut close_cause = WsError::SendFailed;
        loop {
            if conn.is_terminated() {
                break;
            }
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match dispatch_frame(&conn, text.as_bytes()).await {
                                Ok(Some(close)) => {
                                    close_cause = close_to_error(close);
                                    break;
                                }
                                Ok(None) => {}
                                Err(cause) => {
                                    close_cause = cause;
                                    break;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            match dispatch_frame(&conn, &bytes).await {
                                Ok(Some(close)) => {
                                    close_cause = close_to_error(close);
                                    break;
                                }
                                Ok(None) => {}
                                Err(cause) => {
                                    close_cause = cause;
                                    break;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
                _ = closed_notify.notified() => {
                    break;
                }
            }
        }

        conn.close(close_cause).await;
        self.unregister(&conn.pub_client_id).await;
        forward.abort();
    }
}

/// Runs `Connection::handle_frame` under panic isolation. A panic anywhere
/// in dispatch is an unhandled runtime error the core can't attribute to a
/// more specific cause, so it closes with `3703` (§4.4, §7) instead of
/// taking the reader loop down with it.
async fn dispatch_frame(
    conn: &Arc<Connection>,
    bytes: &[u8],
) -> Result<Option<crate::connection::CloseRequest>, WsError> {
    match AssertUnwindSafe(conn.handle_frame(bytes)).catch_unwind().await {
        Ok(close) => Ok(close),
        Err(_) => Err(WsError::UnhandledError("frame dispatch panicked".into())),
    }
}

/// Maps a dispatch-level close request back to the `WsError` whose
/// `close_code` produced it, so `Connection::close` logs a cause consistent
/// with the code already chosen in `handle_frame`.
fn close_to_error(close: crate::connection::CloseRequest) -> WsError {
    match close.code {
        4001 => WsError::InvalidUtf8,
        4002 => WsError::PingsMissed,
        _ => WsError::AuthenticationFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::HostServices;
    use crate::host::{AuditEvent, Credentials, InvokeContext, NoopHookSink};
    use async_trait::async_trait;

    struct EchoInvoker;
    #[async_trait]
    impl crate::host::ServiceInvoker for EchoInvoker {
        async fn invoke(&self, ctx: InvokeContext) -> Result<Value, WsError> {
            Ok(ctx.payload)
        }
    }

    struct AllowAllAuth;
    #[async_trait]
    impl crate::host::AuthBackend for AllowAllAuth {
        async fn authenticate(&self, _cid: &str, _creds: &Credentials) -> Result<bool, WsError> {
            Ok(true)
        }
    }

    struct NullAudit;
    #[async_trait]
    impl crate::host::AuditSink for NullAudit {
        async fn store(&self, _event: AuditEvent) {}
        async fn delete_container(&self, _pub_client_id: &str) {}
    }

    fn test_server() -> Arc<ChannelServer> {
        let config = Arc::new(Config {
            address: "127.0.0.1:0".into(),
            path: "/ws".into(),
            sec_name: None,
            sec_type: None,
            needs_tls: false,
            token_ttl: Duration::from_secs(60),
            new_token_wait_time: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            pings_missed_threshold: 2,
            json_library: crate::config::JsonLibrary::Default,
            hook_service: None,
            is_audit_log_sent_active: false,
            is_audit_log_received_active: false,
            service_name: "demo.echo".into(),
            correlator_timeout: Duration::from_secs(5),
            interact_update_interval: Duration::from_secs(30),
            broadcast_concurrency: 16,
        });
        let host = Arc::new(HostServices {
            service_invoker: Arc::new(EchoInvoker),
            auth_backend: Arc::new(AllowAllAuth),
            audit_sink: Arc::new(NullAudit),
            hook_sink: Arc::new(NoopHookSink),
        });
        ChannelServer::new(ChannelServerConfig { config, host })
    }

    #[tokio::test]
    async fn registry_starts_empty() {
        let server = test_server();
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn get_unknown_client_is_none() {
        let server = test_server();
        assert!(server.get_client_by_pub_id("ws.nobody").await.is_none());
    }

    #[tokio::test]
    async fn disconnect_unknown_client_returns_false() {
        let server = test_server();
        assert!(!server.disconnect_client("ws.nobody", WsError::SendFailed).await);
    }

    #[tokio::test]
    async fn register_then_look_up_round_trips() {
        let server = test_server();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            server.config.clone(),
            server.host.clone(),
            PeerInfo::default(),
            tx,
        );
        let id = conn.pub_client_id.clone();
        server.register(conn).await;
        assert!(server.get_client_by_pub_id(&id).await.is_some());
        assert_eq!(server.connection_count().await, 1);
    }

    #[tokio::test]
    async fn deliver_to_subscribers_reaches_only_subscribed_connections() {
        let server = test_server();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let conn_a = Connection::new(server.config.clone(), server.host.clone(), PeerInfo::default(), tx_a);
        let conn_b = Connection::new(server.config.clone(), server.host.clone(), PeerInfo::default(), tx_b);
        conn_a.add_sub_key("topic.orders".into()).await;
        server.register(conn_a.clone()).await;
        server.register(conn_b.clone()).await;

        let messages = vec![PubSubMessage {
            payload: crate::delivery::PubSubPayload::Value(serde_json::json!({"n": 1})),
            reply_to_sk: None,
        }];
        let delivered = server.deliver_to_subscribers("topic.orders", messages).await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_regardless_of_subscriptions() {
        let server = test_server();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let conn_a = Connection::new(server.config.clone(), server.host.clone(), PeerInfo::default(), tx_a);
        let conn_b = Connection::new(server.config.clone(), server.host.clone(), PeerInfo::default(), tx_b);
        conn_a.add_sub_key("topic.orders".into()).await;
        server.register(conn_a.clone()).await;
        server.register(conn_b.clone()).await;

        let delivered = server.broadcast(serde_json::json!({"cmd": "reload"})).await;
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let OutboundFrame::Text(text) = rx.try_recv().unwrap() else {
                panic!("expected a text frame")
            };
            let v: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v["data"]["cmd"], "reload");
        }
    }
}
