use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::correlator::{CorrelatedReply, Correlator};
use crate::delivery::{self, PubSubMessage};
use crate::error::WsError;
use crate::frame::{apply_utf8_policy, Utf8Outcome};
use crate::hooks::HookInvoker;
use crate::host::{
    AuditSink, AuthBackend, Credentials, HookContext, HookSink, InvokeContext, ServiceInvoker,
};
use crate::interaction::InteractionRecorder;
use crate::message::{Action, ClientMessage, ServerMessage};
use crate::token::Token;
use crate::transport::OutboundFrame;
use crate::watchdog;

/// Coarse lifecycle state (§4.4), tracked mainly for logging and tests — the
/// actual behavior is driven by the finer-grained flags below (so a stray
/// read of `state` is never the only thing gating an action).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Accepted,
    AwaitingAuth,
    Authenticated,
    Closing,
    Closed,
}

/// Best-effort network identity captured at accept time (§3).
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub peer_address: Option<String>,
    pub local_address: Option<String>,
    pub forwarded_for: Option<String>,
    pub peer_fqdn: Option<String>,
    pub forwarded_for_fqdn: Option<String>,
}

/// The host-provided collaborators a Connection calls into (§6).
pub struct HostServices {
    pub service_invoker: Arc<dyn ServiceInvoker>,
    pub auth_backend: Arc<dyn AuthBackend>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub hook_sink: Arc<dyn HookSink>,
}

/// A close the dispatch loop wants the transport to perform.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

/// The Connection Object (D): holds per-peer state, owns the Token/Session
/// State (C) and the Message Schema (B), and drives the lifecycle described
/// in §4.4. One instance per accepted WebSocket; always held behind `Arc`
/// since the reader loop, the pinger, and pub/sub delivery tasks all need a
/// handle to it concurrently.
pub struct Connection {
    pub pub_client_id: String,
    config: Arc<Config>,
    host: Arc<HostServices>,
    peer: PeerInfo,
    connection_time: chrono::DateTime<Utc>,

    ext_client_id: Mutex<Option<String>>,
    ext_client_name: Mutex<Option<String>>,
    sql_ws_client_id: Mutex<Option<String>>,

    has_session_opened: Arc<AtomicBool>,
    watchdog_notify: Arc<Notify>,
    token: Arc<Mutex<Option<Token>>>,

    pings_missed: Arc<AtomicU32>,
    sub_keys: Mutex<HashSet<String>>,

    correlator: Arc<Correlator>,
    audit: AuditLog,
    hooks: HookInvoker,
    interaction: InteractionRecorder,

    outbound: mpsc::UnboundedSender<OutboundFrame>,
    terminated: Arc<AtomicBool>,
    /// Fires the moment `close()` commits to tearing the connection down, so
    /// the reader loop (a different task, in `server.rs`) notices a
    /// pinger- or watchdog-triggered close within one suspension cycle (§5)
    /// instead of blocking on the socket forever.
    closed_notify: Arc<Notify>,
    disconnect_requested: AtomicBool,

    state: Mutex<LifecycleState>,
    pinger_handle: Mutex<Option<JoinHandle<()>>>,
    watchdog_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(
        config: Arc<Config>,
        host: Arc<HostServices>,
        peer: PeerInfo,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Arc<Self> {
        let audit = AuditLog::new(
            host.audit_sink.clone(),
            config.is_audit_log_sent_active,
            config.is_audit_log_received_active,
        );
        let hooks = HookInvoker::new(host.hook_sink.clone());
        let interaction = InteractionRecorder::new(config.interact_update_interval);

        Arc::new(Connection {
            pub_client_id: format!("ws.{}", Uuid::new_v4()),
            config,
            host,
            peer,
            connection_time: Utc::now(),
            ext_client_id: Mutex::new(None),
            ext_client_name: Mutex::new(None),
            sql_ws_client_id: Mutex::new(None),
            has_session_opened: Arc::new(AtomicBool::new(false)),
            watchdog_notify: Arc::new(Notify::new()),
            token: Arc::new(Mutex::new(None)),
            pings_missed: Arc::new(AtomicU32::new(0)),
            sub_keys: Mutex::new(HashSet::new()),
            correlator: Arc::new(Correlator::new()),
            audit,
            hooks,
            interaction,
            outbound,
            terminated: Arc::new(AtomicBool::new(false)),
            closed_notify: Arc::new(Notify::new()),
            disconnect_requested: AtomicBool::new(false),
            state: Mutex::new(LifecycleState::Accepted),
            pinger_handle: Mutex::new(None),
            watchdog_handle: Mutex::new(None),
        })
    }

    pub async fn is_authenticated(&self) -> bool {
        self.has_session_opened.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Handle the reader loop in `server.rs` races against `stream.next()`
    /// so a close decided on another task (pinger, watchdog) is noticed
    /// promptly instead of only on the connection's next inbound frame.
    pub fn closed_notify(&self) -> Arc<Notify> {
        self.closed_notify.clone()
    }

    fn hook_ctx(&self, ext_client_id: Option<String>, ext_client_name: Option<String>) -> HookContext {
        HookContext {
            pub_client_id: self.pub_client_id.clone(),
            ext_client_id,
            ext_client_name,
            connection_time: self.connection_time,
            peer_address: self.peer.peer_address.clone(),
            peer_fqdn: self.peer.peer_fqdn.clone(),
        }
    }

    /// Spawn the Session Watchdog (E) — called the moment the connection is
    /// accepted (Accepted → AwaitingAuth, §4.4).
    pub fn spawn_watchdog(self: &Arc<Self>) {
        *self.state.try_lock().expect("uncontended at spawn time") = LifecycleState::AwaitingAuth;
        let opened = self.has_session_opened.clone();
        let notify = self.watchdog_notify.clone();
        let deadline = self.config.new_token_wait_time;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let opened_in_time = watchdog::await_session_or_timeout(opened, notify, deadline).await;
            if !opened_in_time && !this.terminated.load(Ordering::SeqCst) {
                tracing::debug!(pub_client_id = %this.pub_client_id, "watchdog deadline expired without authentication");
                this.send_best_effort(ServerMessage::forbidden(new_cid())).await;
                this.close(WsError::HandshakeFailure("new_token_wait_time exceeded".into())).await;
            }
        });
        *self.watchdog_handle.try_lock().expect("uncontended at spawn time") = Some(handle);
    }

    /// Spawn the Background Pinger (F) — called right after authentication
    /// succeeds.
    fn spawn_pinger(self: &Arc<Self>) {
        let ctx = crate::pinger::PingerContext {
            pub_client_id: self.pub_client_id.clone(),
            ping_interval: self.config.ping_interval,
            pings_missed_threshold: self.config.pings_missed_threshold,
            outbound: self.outbound.clone(),
            json_library: self.config.json_library,
            correlator: self.correlator.clone(),
            pings_missed: self.pings_missed.clone(),
            terminated: self.terminated.clone(),
            token: self.token.clone(),
            audit: self.audit.clone(),
        };
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let exit = crate::pinger::run(ctx).await;
            match exit {
                crate::pinger::PingerExit::PingsMissedThreshold => {
                    this.close(WsError::PingsMissed).await;
                }
                crate::pinger::PingerExit::RuntimeError => {
                    this.close(WsError::PingRuntimeError(
                        "background pinger task panicked".into(),
                    ))
                    .await;
                }
                crate::pinger::PingerExit::StreamTerminated => {}
            }
        });
        // Only called once, right after authentication succeeds, so the slot
        // is always uncontended here.
        if let Ok(mut slot) = self.pinger_handle.try_lock() {
            *slot = Some(handle);
        }
    }

    /// Sends a frame the dispatch loop doesn't need a reply to (Forbidden,
    /// Authenticate, the post-auth UTF-8 `Error`, and the pinger's pings) and
    /// records it in the audit log (§4.9: "every outbound text frame").
    async fn send_best_effort(&self, msg: ServerMessage) {
        if let Ok(text) = msg.to_json_with(self.config.json_library) {
            let (msg_id, in_reply_to) = msg.audit_ids();
            self.audit
                .record_sent(&self.pub_client_id, msg.audit_data(), msg_id, in_reply_to)
                .await;
            let _ = self.outbound.send(OutboundFrame::Text(text));
        }
    }

    /// Idempotent close (§4.4 Closing → Closed, §8 "disconnect_client is
    /// idempotent"). The second call is a no-op: `disconnect_requested` is
    /// set with a single `compare_exchange`, so only the first caller
    /// proceeds past it.
    ///
    /// Besides the bookkeeping below, this is the single place that decides
    /// the WebSocket close code (§4.4 "Close codes used by the core") and
    /// queues it on the outbound channel, so every close path — inbound
    /// dispatch, the watchdog, the pinger — produces an actual close frame
    /// the peer can observe, not just a silently dropped socket.
    pub async fn close(self: &Arc<Self>, cause: WsError) {
        if self
            .disconnect_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        *self.state.lock().await = LifecycleState::Closing;
        self.terminated.store(true, Ordering::SeqCst);
        let _ = self.outbound.send(OutboundFrame::Close {
            code: cause.close_code().unwrap_or(1000),
            reason: cause.to_string(),
        });
        self.closed_notify.notify_waiters();

        if let Some(handle) = self.pinger_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.watchdog_handle.lock().await.take() {
            handle.abort();
        }

        let ext_client_id = self.ext_client_id.lock().await.clone();
        let ext_client_name = self.ext_client_name.lock().await.clone();

        if self.has_session_opened.load(Ordering::SeqCst) {
            if let Some(sql_id) = self.sql_ws_client_id.lock().await.clone() {
                let _ = self
                    .host
                    .service_invoker
                    .invoke(InvokeContext {
                        service_name: "zato.channel.web-socket.client.delete".into(),
                        payload: serde_json::json!({ "id": sql_id }),
                        pub_client_id: self.pub_client_id.clone(),
                        ext_client_id: ext_client_id.clone(),
                        ext_client_name: ext_client_name.clone(),
                        peer_address: self.peer.peer_address.clone(),
                        cid: new_cid(),
                    })
                    .await;
            }
            self.hooks
                .on_disconnected(self.hook_ctx(ext_client_id, ext_client_name))
                .await;
        }

        self.audit.delete_container(&self.pub_client_id).await;
        *self.state.lock().await = LifecycleState::Closed;

        tracing::info!(
            pub_client_id = %self.pub_client_id,
            close_code = cause.close_code(),
            cause = %cause,
            "connection closed"
        );
    }

    pub fn close_code_for(&self, cause: &WsError) -> u16 {
        cause.close_code().unwrap_or(1000)
    }

    /// Inbound dispatch (§4.4 "Inbound dispatch"). Returns `Some(CloseRequest)`
    /// when the transport should tear the socket down after sending whatever
    /// this call already queued on the outbound channel.
    pub async fn handle_frame(self: &Arc<Self>, bytes: &[u8]) -> Option<CloseRequest> {
        let has_opened = self.has_session_opened.load(Ordering::SeqCst);
        let text = match apply_utf8_policy(bytes, has_opened) {
            Utf8Outcome::Ok(s) => s,
            Utf8Outcome::CloseBeforeAuth => {
                return Some(CloseRequest {
                    code: 4001,
                    reason: "Invalid UTF-8 bytes".into(),
                });
            }
            Utf8Outcome::ErrorAfterAuth => {
                self.send_best_effort(ServerMessage::error(
                    new_cid(),
                    String::new(),
                    422,
                    "Invalid UTF-8 bytes".into(),
                ))
                .await;
                return None;
            }
        };

        let cid = new_cid();
        let msg = match ClientMessage::parse(&text) {
            Ok(m) => m,
            Err(e) => {
                self.send_best_effort(ServerMessage::error(
                    cid,
                    String::new(),
                    400,
                    e.reason(),
                ))
                .await;
                return None;
            }
        };

        self.audit
            .record_received(
                &self.pub_client_id,
                msg.data.clone().unwrap_or(Value::Null),
                msg.meta.id.clone(),
                msg.meta.in_reply_to.clone(),
            )
            .await;
        if self.interaction.should_flush(Utc::now()) {
            self.flush_interaction().await;
        }

        // Mirrors the original's branch on session state (`_received_message`):
        // a connection that hasn't opened a session yet only ever dispatches
        // to `handle_create_session`, no token exists to check. Once a
        // session is open, every inbound message — including a fresh
        // `create-session` re-authentication attempt — must carry a valid
        // token first (§3's invariant, §4.4 steps a/b); `action` only decides
        // how to dispatch *after* that check passes (§4.4 steps c/d). There is
        // no carve-out for `create-session` here: re-auth is still gated on
        // already holding a valid token.
        if !self.has_session_opened.load(Ordering::SeqCst) {
            if msg.is_auth {
                self.handle_create_session(cid, msg).await;
                return None;
            }
            self.send_best_effort(ServerMessage::forbidden(cid)).await;
            return Some(CloseRequest {
                code: 1000,
                reason: "not authenticated".into(),
            });
        }

        if let Some(close) = self.check_token(&cid, &msg).await {
            return Some(close);
        }

        if msg.is_auth {
            self.handle_create_session(cid, msg).await;
            return None;
        }

        if msg.meta.action == Action::ClientResponse {
            self.handle_client_response(msg).await;
            return None;
        }

        self.invoke_and_reply(cid, msg).await;
        None
    }

    /// Token-missing/mismatch/expired checks (§4.4 steps a/b, §3's invariant
    /// that every accepted inbound message after session open carries a
    /// valid, unexpired token). Applied ahead of the `action` branch in
    /// `handle_frame` for every message on an already-open session.
    async fn check_token(self: &Arc<Self>, cid: &str, msg: &ClientMessage) -> Option<CloseRequest> {
        let token_guard = self.token.lock().await;
        let token = match token_guard.as_ref() {
            Some(t) => t.clone(),
            None => {
                drop(token_guard);
                self.send_best_effort(ServerMessage::forbidden(cid.to_string())).await;
                return Some(CloseRequest { code: 1000, reason: "token missing".into() });
            }
        };
        drop(token_guard);

        match &msg.meta.token {
            Some(t) if *t == token.value => {}
            _ => {
                self.send_best_effort(ServerMessage::forbidden(cid.to_string())).await;
                return Some(CloseRequest { code: 1000, reason: "token mismatch".into() });
            }
        }

        if token.is_expired(Utc::now()) {
            self.send_best_effort(ServerMessage::forbidden(cid.to_string())).await;
            return Some(CloseRequest { code: 1000, reason: "token expired".into() });
        }

        None
    }

    /// Invokes the configured host service and replies with its result
    /// (§4.4 "Otherwise invoke the configured service"). A panic inside the
    /// service invocation itself (as opposed to a reported `WsError`) is a
    /// runtime error the core can't recover from client-visibly, so it tears
    /// the connection down with close code `3701` (§4.4, §7) instead of
    /// trying to reply.
    async fn invoke_and_reply(self: &Arc<Self>, cid: String, msg: ClientMessage) {
        let in_reply_to = msg.meta.id.clone().unwrap_or_default();
        let ctx = InvokeContext {
            service_name: self.config.service_name.clone(),
            payload: msg.data.unwrap_or(Value::Null),
            pub_client_id: self.pub_client_id.clone(),
            ext_client_id: self.ext_client_id.lock().await.clone(),
            ext_client_name: self.ext_client_name.lock().await.clone(),
            peer_address: self.peer.peer_address.clone(),
            cid: cid.clone(),
        };

        let invoked = AssertUnwindSafe(self.host.service_invoker.invoke(ctx))
            .catch_unwind()
            .await;
        let result = match invoked {
            Ok(result) => result,
            Err(_) => {
                self.close(WsError::InvokeRuntimeError(
                    "service invocation panicked".into(),
                ))
                .await;
                return;
            }
        };

        let reply = match result {
            Ok(data) => ServerMessage::ok(cid.clone(), in_reply_to.clone(), Some(data)),
            Err(e) => {
                let status = e.client_status().unwrap_or(500);
                ServerMessage::error(cid.clone(), in_reply_to.clone(), status, e.reason())
            }
        };

        if let Ok(text) = reply.to_json_with(self.config.json_library) {
            self.audit
                .record_sent(&self.pub_client_id, reply.audit_data(), Some(cid), Some(in_reply_to))
                .await;
            let _ = self.outbound.send(OutboundFrame::Text(text));
        }
    }

    /// Routes an inbound `client-response` envelope (§4.7, and the pub/sub
    /// response path noted in §3): first try it as a pong (matched by
    /// `meta.id`, since a pong is a literal echo and never sets
    /// `in_reply_to`), then as a regular correlator reply (matched by
    /// `in_reply_to`), and if neither claims it, hand it to the
    /// `on_pubsub_response` hook.
    async fn handle_client_response(self: &Arc<Self>, msg: ClientMessage) {
        if let Some(id) = &msg.meta.id {
            if self.correlator.is_awaited(id) {
                self.correlator.resolve(id, CorrelatedReply::Pong);
                return;
            }
        }
        if let Some(in_reply_to) = &msg.meta.in_reply_to {
            if self.correlator.is_awaited(in_reply_to) {
                let data = msg.data.clone().unwrap_or(Value::Null);
                self.correlator
                    .resolve(in_reply_to, CorrelatedReply::Message(data));
                return;
            }
        }
        let ext_client_id = self.ext_client_id.lock().await.clone();
        let ext_client_name = self.ext_client_name.lock().await.clone();
        self.hooks
            .on_pubsub_response(self.hook_ctx(ext_client_id, ext_client_name), msg)
            .await;
    }

    /// Handles both initial authentication and re-authentication (§4.3,
    /// §4.4, and the re-auth note in §3): a `create-session`
    /// envelope on an unauthenticated connection creates a token; on an
    /// already-authenticated connection it extends the existing one.
    async fn handle_create_session(self: &Arc<Self>, cid: String, msg: ClientMessage) {
        let in_reply_to = msg.meta.id.clone().unwrap_or_default();

        if msg.meta.action != Action::CreateSession {
            self.send_best_effort(ServerMessage::forbidden(cid)).await;
            self.close(WsError::AuthenticationFailure).await;
            return;
        }

        let credentials = Credentials {
            username: msg.meta.username.clone(),
            secret: msg.meta.secret.clone(),
        };
        if self.config.sec_name.is_some() && credentials.secret.is_none() {
            self.send_best_effort(ServerMessage::forbidden(cid)).await;
            self.close(WsError::AuthenticationFailure).await;
            return;
        }

        let authenticated = match self.host.auth_backend.authenticate(&cid, &credentials).await {
            Ok(ok) => ok,
            Err(_) => false,
        };
        if !authenticated {
            self.send_best_effort(ServerMessage::forbidden(cid)).await;
            self.close(WsError::AuthenticationFailure).await;
            return;
        }

        let was_already_open = self.has_session_opened.swap(true, Ordering::SeqCst);
        let token_value;
        {
            let mut guard = self.token.lock().await;
            if was_already_open {
                if let Some(token) = guard.as_mut() {
                    token.extend(None);
                    token_value = token.value.clone();
                } else {
                    let token = Token::new(self.config.token_ttl);
                    token_value = token.value.clone();
                    *guard = Some(token);
                }
            } else {
                let token = Token::new(self.config.token_ttl);
                token_value = token.value.clone();
                *guard = Some(token);
            }
        }
        self.watchdog_notify.notify_one();

        *self.ext_client_id.lock().await = msg.meta.client_id.clone();
        *self.ext_client_name.lock().await = msg
            .meta
            .client_name
            .clone()
            .map(|n| n.into_string());

        if !was_already_open {
            let ext_client_id = self.ext_client_id.lock().await.clone();
            let ext_client_name = self.ext_client_name.lock().await.clone();
            let create_result = self
                .host
                .service_invoker
                .invoke(InvokeContext {
                    service_name: "zato.channel.web-socket.client.create".into(),
                    payload: serde_json::json!({
                        "pub_client_id": self.pub_client_id,
                        "ext_client_id": ext_client_id,
                        "ext_client_name": ext_client_name,
                    }),
                    pub_client_id: self.pub_client_id.clone(),
                    ext_client_id: ext_client_id.clone(),
                    ext_client_name: ext_client_name.clone(),
                    peer_address: self.peer.peer_address.clone(),
                    cid: cid.clone(),
                })
                .await;
            if let Ok(Value::Object(obj)) = create_result {
                if let Some(id) = obj.get("id").and_then(|v| v.as_str()) {
                    *self.sql_ws_client_id.lock().await = Some(id.to_string());
                }
            }
            self.hooks
                .on_connected(self.hook_ctx(ext_client_id, ext_client_name))
                .await;
            self.spawn_pinger();
            *self.state.lock().await = LifecycleState::Authenticated;
        }

        self.send_best_effort(ServerMessage::authenticate(cid, in_reply_to, token_value))
            .await;
    }

    async fn flush_interaction(&self) {
        let ext_client_id = self.ext_client_id.lock().await.clone();
        let _ = self
            .host
            .service_invoker
            .invoke(InvokeContext {
                service_name: "zato.pubsub.subscription.update-interaction-metadata".into(),
                payload: Value::Null,
                pub_client_id: self.pub_client_id.clone(),
                ext_client_id: ext_client_id.clone(),
                ext_client_name: None,
                peer_address: self.peer.peer_address.clone(),
                cid: new_cid(),
            })
            .await;
        let _ = self
            .host
            .service_invoker
            .invoke(InvokeContext {
                service_name: "zato.channel.web-socket.client.set-last-seen".into(),
                payload: Value::Null,
                pub_client_id: self.pub_client_id.clone(),
                ext_client_id,
                ext_client_name: None,
                peer_address: self.peer.peer_address.clone(),
                cid: new_cid(),
            })
            .await;
    }

    // ── Pub/Sub Delivery Binding (H) ────────────────────────────────────

    pub async fn add_sub_key(&self, sub_key: String) {
        self.sub_keys.lock().await.insert(sub_key);
    }

    pub async fn remove_sub_key(&self, sub_key: &str) {
        self.sub_keys.lock().await.remove(sub_key);
    }

    pub async fn owns_sub_key(&self, sub_key: &str) -> bool {
        self.sub_keys.lock().await.contains(sub_key)
    }

    /// Deliver a batch of pub/sub messages (§4.8). Fire-and-forget: no
    /// correlator waiter is registered.
    pub async fn deliver_pubsub(&self, messages: Vec<PubSubMessage>) -> Result<(), WsError> {
        delivery::deliver(
            &self.outbound,
            &self.pub_client_id,
            messages,
            self.config.json_library,
            &self.audit,
        )
        .await?;
        if self.interaction.should_flush(Utc::now()) {
            self.flush_interaction().await;
        }
        Ok(())
    }

    // ── Request Correlator-backed invocation (used by ChannelServer::invoke_client) ──

    pub async fn invoke_client(
        &self,
        request: Value,
        timeout: std::time::Duration,
    ) -> Result<Option<Value>, WsError> {
        let id = new_cid();
        let frame = ServerMessage::invoke_client(id.clone(), id.clone(), request);
        let text = frame.to_json_with(self.config.json_library)?;
        let wait = self.correlator.wait(id.clone(), timeout);
        self.audit
            .record_sent(&self.pub_client_id, frame.audit_data(), Some(id), None)
            .await;
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| WsError::SendFailed)?;
        match wait.await {
            Some(CorrelatedReply::Message(v)) => Ok(Some(v)),
            Some(CorrelatedReply::Pong) => Ok(None),
            None => Ok(None),
        }
    }

    /// Fans a single `InvokeClient` request out to this connection without
    /// registering a correlator waiter (§4.10 `broadcast`, glossary
    /// "Fan-out (broadcast)"): fire-and-forget, no reply awaited.
    pub async fn send_invoke_client_fire_and_forget(&self, request: Value) -> Result<(), WsError> {
        let id = new_cid();
        let frame = ServerMessage::invoke_client(id.clone(), id.clone(), request);
        let text = frame.to_json_with(self.config.json_library)?;
        self.audit
            .record_sent(&self.pub_client_id, frame.audit_data(), Some(id), None)
            .await;
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| WsError::SendFailed)
    }
}

fn new_cid() -> String {
    Uuid::new_v4().to_string()
}
