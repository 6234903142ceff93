use std::env;
use std::sync::Once;
use std::time::Duration;

/// Channel configuration, as named in the external-interfaces contract: address,
/// upgrade path, optional security binding, timing knobs, and the ambient
/// toggles (JSON library, audit log, hook service).
#[derive(Clone, Debug)]
pub struct Config {
    pub address: String,
    pub path: String,
    pub sec_name: Option<String>,
    pub sec_type: Option<String>,
    pub needs_tls: bool,
    pub token_ttl: Duration,
    pub new_token_wait_time: Duration,
    pub ping_interval: Duration,
    pub pings_missed_threshold: u32,
    pub json_library: JsonLibrary,
    pub hook_service: Option<String>,
    pub is_audit_log_sent_active: bool,
    pub is_audit_log_received_active: bool,
    pub service_name: String,
    /// Default timeout for a Request Correlator wait when the caller does not
    /// supply one explicitly (§5: "default 5 s").
    pub correlator_timeout: Duration,
    /// Minimum interval between flushed last-seen updates (§4.12).
    pub interact_update_interval: Duration,
    /// Upper bound on concurrent fan-out tasks for `broadcast` (§9 Open Question c).
    pub broadcast_concurrency: usize,
}

/// Selectable JSON serialization backend (§4.2). Unknown names fall back to
/// `Default` with a one-time warning — see `JsonLibrary::parse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonLibrary {
    Stdlib,
    Default,
    FastBinary,
    Bson,
}

static UNRECOGNIZED_WARNED: Once = Once::new();

impl JsonLibrary {
    pub fn parse(name: &str) -> Self {
        match name {
            "stdlib" => JsonLibrary::Stdlib,
            "default" => JsonLibrary::Default,
            "fast-binary" => JsonLibrary::FastBinary,
            "bson" => JsonLibrary::Bson,
            other => {
                UNRECOGNIZED_WARNED.call_once(|| {
                    tracing::warn!(
                        json_library = other,
                        "unrecognized json_library, falling back to default"
                    );
                });
                JsonLibrary::Default
            }
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let secs = |name: &str, default: u64| -> u64 {
            env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Ok(Config {
            address: env::var("WSX_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8900".to_string()),
            path: env::var("WSX_PATH").unwrap_or_else(|_| "/ws".to_string()),
            sec_name: env::var("WSX_SEC_NAME").ok(),
            sec_type: env::var("WSX_SEC_TYPE").ok(),
            needs_tls: env::var("WSX_NEEDS_TLS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            token_ttl: Duration::from_secs(secs("WSX_TOKEN_TTL", 3600)),
            new_token_wait_time: Duration::from_secs(secs("WSX_NEW_TOKEN_WAIT_TIME", 5)),
            ping_interval: Duration::from_secs(secs("WSX_PING_INTERVAL", 30)),
            pings_missed_threshold: secs("WSX_PINGS_MISSED_THRESHOLD", 2) as u32,
            json_library: JsonLibrary::parse(
                &env::var("WSX_JSON_LIBRARY").unwrap_or_else(|_| "default".to_string()),
            ),
            hook_service: env::var("WSX_HOOK_SERVICE").ok(),
            is_audit_log_sent_active: env::var("WSX_AUDIT_LOG_SENT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            is_audit_log_received_active: env::var("WSX_AUDIT_LOG_RECEIVED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            service_name: env::var("WSX_SERVICE_NAME")
                .unwrap_or_else(|_| "demo.service".to_string()),
            correlator_timeout: Duration::from_secs(secs("WSX_CORRELATOR_TIMEOUT", 5)),
            interact_update_interval: Duration::from_secs(secs("WSX_INTERACT_UPDATE_INTERVAL", 30)),
            broadcast_concurrency: secs("WSX_BROADCAST_CONCURRENCY", 256) as usize,
        })
    }
}
