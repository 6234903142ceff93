use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

use wsx_server::config::Config;
use wsx_server::connection::HostServices;
use wsx_server::host::{
    AuditEvent, AuditSink, AuthBackend, Credentials, HookSink, InvokeContext, ServiceInvoker,
};
use wsx_server::server::{ChannelServer, ChannelServerConfig};
use wsx_server::WsError;

/// Minimal in-memory `ServiceInvoker`: echoes the request payload back, and
/// answers the handful of lifecycle/pubsub service names the core calls by
/// well-known name (§6) with a shape good enough to demo the scenarios in
/// §8 without a real Zato backend behind it.
struct InMemoryServices {
    next_sql_id: Mutex<u64>,
}

impl InMemoryServices {
    fn new() -> Self {
        Self {
            next_sql_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl ServiceInvoker for InMemoryServices {
    async fn invoke(&self, ctx: InvokeContext) -> Result<Value, WsError> {
        match ctx.service_name.as_str() {
            "zato.channel.web-socket.client.create" => {
                let mut next = self.next_sql_id.lock().await;
                let id = *next;
                *next += 1;
                Ok(serde_json::json!({ "id": id.to_string() }))
            }
            "zato.channel.web-socket.client.delete"
            | "zato.channel.web-socket.client.set-last-seen"
            | "zato.pubsub.subscription.update-interaction-metadata" => Ok(Value::Null),
            _ => {
                tracing::debug!(service = %ctx.service_name, cid = %ctx.cid, "invoking demo service");
                Ok(ctx.payload)
            }
        }
    }
}

/// Accepts any non-empty username/secret pair — a stand-in for a real
/// `auth_func` bound to a security definition (§6).
struct DemoAuth;

#[async_trait]
impl AuthBackend for DemoAuth {
    async fn authenticate(&self, _cid: &str, credentials: &Credentials) -> Result<bool, WsError> {
        Ok(credentials.username.as_deref().is_some_and(|u| !u.is_empty())
            && credentials.secret.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

/// Audit sink that logs through `tracing` instead of a database table — kept
/// inert unless `WSX_AUDIT_LOG_SENT`/`WSX_AUDIT_LOG_RECEIVED` are set.
struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn store(&self, event: AuditEvent) {
        tracing::info!(
            kind = ?event.kind,
            object_id = %event.object_id,
            msg_id = ?event.msg_id,
            "audit event"
        );
    }

    async fn delete_container(&self, pub_client_id: &str) {
        tracing::debug!(pub_client_id, "audit container deleted");
    }
}

struct TracingHookSink;

#[async_trait]
impl HookSink for TracingHookSink {
    async fn on_connected(&self, ctx: wsx_server::host::HookContext) {
        tracing::info!(pub_client_id = %ctx.pub_client_id, ext_client_id = ?ctx.ext_client_id, "client connected");
    }

    async fn on_disconnected(&self, ctx: wsx_server::host::HookContext) {
        tracing::info!(pub_client_id = %ctx.pub_client_id, "client disconnected");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let is_production = std::env::var("APP_ENV").as_deref() == Ok("production");
    if is_production {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(address = %config.address, path = %config.path, "starting wsx-server");

    let host = Arc::new(HostServices {
        service_invoker: Arc::new(InMemoryServices::new()),
        auth_backend: Arc::new(DemoAuth),
        audit_sink: Arc::new(TracingAuditSink),
        hook_sink: Arc::new(TracingHookSink) as Arc<dyn HookSink>,
    });

    let server = ChannelServer::new(ChannelServerConfig {
        config: config.clone(),
        host,
    });
    let router = server.router();

    let addr: SocketAddr = config.address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
