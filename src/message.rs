use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action discriminator on an inbound envelope (§4.2). A closed set — modeled
/// as a tagged enum rather than a runtime string switch, per the "dynamic
/// dispatch on action" design note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CreateSession,
    ClientResponse,
    InvokeService,
    /// Any action name the core doesn't special-case; dispatched to the host
    /// service invoker the same way `invoke-service` is.
    #[serde(other)]
    Other,
}

impl Default for Action {
    fn default() -> Self {
        Action::ClientResponse
    }
}

/// `meta.ctx` on an inbound envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ctx {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_sk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_to_sk: Option<String>,
}

/// `client_name` may arrive as a plain string or as a map of key/value pairs,
/// in which case it must be serialized as `"k: v; k: v"` with keys sorted
/// (§4.2). `ClientName::into_string` implements that transform.
#[derive(Debug, Clone)]
pub enum ClientName {
    Text(String),
    Map(BTreeMap<String, String>),
}

impl ClientName {
    pub fn into_string(self) -> String {
        match self {
            ClientName::Text(s) => s,
            // BTreeMap already iterates in sorted key order.
            ClientName::Map(m) => m
                .into_iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

impl<'de> Deserialize<'de> for ClientName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(ClientName::Text(s)),
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    out.insert(k, v);
                }
                Ok(ClientName::Map(out))
            }
            other => Err(serde::de::Error::custom(format!(
                "client_name must be a string or object, got {other}"
            ))),
        }
    }
}

impl Serialize for ClientName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.clone().into_string())
    }
}

/// Inbound envelope metadata (§3, §6 wire protocol).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMeta {
    #[serde(default)]
    pub action: Action,
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<ClientName>,
    pub username: Option<String>,
    pub secret: Option<String>,
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub ctx: Ctx,
}

/// Parsed inbound message (§3 ClientMessage). `is_auth` is derived during
/// parsing, not carried on the wire.
#[derive(Debug, Clone, Default)]
pub struct ClientMessage {
    pub meta: ClientMeta,
    pub data: Option<Value>,
    pub is_auth: bool,
}

impl ClientMessage {
    /// Parse a raw text frame into a `ClientMessage` (§4.2).
    ///
    /// `meta` is optional at the envelope level; its absence yields an empty
    /// `ClientMessage` with the default action (`client-response`). Unknown
    /// top-level and `meta` fields are dropped silently by serde's default
    /// behavior, so an envelope carrying a field this core doesn't know about
    /// yet is never rejected for it.
    pub fn parse(raw: &str) -> Result<Self, crate::error::WsError> {
        #[derive(Deserialize, Default)]
        struct Envelope {
            #[serde(default)]
            meta: Option<ClientMeta>,
            data: Option<Value>,
        }

        let envelope: Envelope = if raw.trim().is_empty() {
            Envelope::default()
        } else {
            serde_json::from_str(raw)?
        };

        let meta = envelope.meta.unwrap_or_default();
        let is_auth = meta.action == Action::CreateSession;

        Ok(ClientMessage {
            meta,
            data: envelope.data,
            is_auth,
        })
    }
}

/// Outbound envelope variants (§3 ServerMessage, §6 wire protocol).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Authenticate {
        meta: AuthenticateMeta,
    },
    Ok {
        meta: OkMeta,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error {
        meta: ErrorMeta,
    },
    Forbidden {
        meta: ForbiddenMeta,
    },
    InvokeClient {
        meta: InvokeMeta,
        data: Value,
    },
    InvokeClientPubSub {
        meta: InvokeMeta,
        data: Value,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticateMeta {
    pub cid: String,
    pub in_reply_to: String,
    pub status: &'static str,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OkMeta {
    pub cid: String,
    pub in_reply_to: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMeta {
    pub cid: String,
    pub in_reply_to: String,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForbiddenMeta {
    pub cid: String,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvokeMeta {
    pub cid: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Ctx>,
}

impl ServerMessage {
    pub fn ok(cid: String, in_reply_to: String, data: Option<Value>) -> Self {
        ServerMessage::Ok {
            meta: OkMeta {
                cid,
                in_reply_to,
                status: "ok",
            },
            data,
        }
    }

    pub fn error(cid: String, in_reply_to: String, status: u16, reason: String) -> Self {
        ServerMessage::Error {
            meta: ErrorMeta {
                cid,
                in_reply_to,
                status,
                reason,
            },
        }
    }

    pub fn forbidden(cid: String) -> Self {
        ServerMessage::Forbidden {
            meta: ForbiddenMeta { cid, status: 403 },
        }
    }

    pub fn authenticate(cid: String, in_reply_to: String, token: String) -> Self {
        ServerMessage::Authenticate {
            meta: AuthenticateMeta {
                cid,
                in_reply_to,
                status: "ok",
                token,
            },
        }
    }

    pub fn invoke_client(cid: String, id: String, data: Value) -> Self {
        ServerMessage::InvokeClient {
            meta: InvokeMeta { cid, id, ctx: None },
            data,
        }
    }

    pub fn invoke_client_pubsub(cid: String, id: String, data: Value, ctx: Option<Ctx>) -> Self {
        ServerMessage::InvokeClientPubSub {
            meta: InvokeMeta { cid, id, ctx },
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, crate::error::WsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes through the `json_library`-selected [`crate::dumper::Dumper`]
    /// (§4.2), rather than always going straight through `serde_json`.
    pub fn to_json_with(
        &self,
        lib: crate::config::JsonLibrary,
    ) -> Result<String, crate::error::WsError> {
        let value = serde_json::to_value(self)?;
        crate::dumper::for_library(lib).dump(value)
    }

    /// The `data` an audit event should record for this frame (§4.9's event
    /// shape names a `data` field for every event, not just `Ok` replies) —
    /// the variants that don't carry a `data` field of their own are
    /// represented by their meaningful meta fields instead of `Value::Null`.
    pub fn audit_data(&self) -> Value {
        match self {
            ServerMessage::Ok { data, .. } => data.clone().unwrap_or(Value::Null),
            ServerMessage::InvokeClient { data, .. } => data.clone(),
            ServerMessage::InvokeClientPubSub { data, .. } => data.clone(),
            ServerMessage::Authenticate { meta } => serde_json::json!({ "token": meta.token }),
            ServerMessage::Error { meta } => {
                serde_json::json!({ "status": meta.status, "reason": meta.reason })
            }
            ServerMessage::Forbidden { meta } => serde_json::json!({ "status": meta.status }),
        }
    }

    /// `(msg_id, in_reply_to)` to record alongside [`Self::audit_data`].
    pub fn audit_ids(&self) -> (Option<String>, Option<String>) {
        match self {
            ServerMessage::Ok { meta, .. } => {
                (Some(meta.cid.clone()), Some(meta.in_reply_to.clone()))
            }
            ServerMessage::Error { meta } => {
                (Some(meta.cid.clone()), Some(meta.in_reply_to.clone()))
            }
            ServerMessage::Authenticate { meta } => {
                (Some(meta.cid.clone()), Some(meta.in_reply_to.clone()))
            }
            ServerMessage::Forbidden { meta } => (Some(meta.cid.clone()), None),
            ServerMessage::InvokeClient { meta, .. } => (Some(meta.id.clone()), None),
            ServerMessage::InvokeClientPubSub { meta, .. } => (Some(meta.id.clone()), None),
        }
    }
}
