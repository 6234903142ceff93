use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::JsonLibrary;
use crate::error::WsError;
use crate::message::{Ctx, ServerMessage};
use crate::transport::OutboundFrame;

/// A single pub/sub message handed to a connection for delivery (§4.8).
/// Either a pre-serialized payload (the pub/sub subsystem already built the
/// wire form) or a plain value the core serializes itself.
#[derive(Debug, Clone)]
pub enum PubSubPayload {
    PreSerialized(String),
    Value(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub payload: PubSubPayload,
    pub reply_to_sk: Option<String>,
}

/// Delivers a batch of pub/sub messages for one `sub_key` to a connection's
/// outbound channel, in order, as `InvokeClientPubSub` frames (§4.8), and
/// records each one in `audit` (§4.9: "every outbound text frame").
///
/// Ordering within a single `sub_key` is preserved because the caller is
/// expected to invoke this once per batch and this function sends its
/// messages sequentially onto the same per-connection outbound channel used
/// for everything else the connection sends — a single FIFO channel with one
/// writer naturally preserves submission order. Ordering across different
/// `sub_key`s is the caller's responsibility and is not guaranteed here,
/// matching §4.8.
pub async fn deliver(
    outbound: &mpsc::UnboundedSender<OutboundFrame>,
    cid: &str,
    messages: Vec<PubSubMessage>,
    json_library: JsonLibrary,
    audit: &AuditLog,
) -> Result<usize, WsError> {
    let mut delivered = 0;
    for msg in messages {
        let data = match msg.payload {
            PubSubPayload::PreSerialized(s) => {
                serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))
            }
            PubSubPayload::Value(v) => v,
        };
        let ctx = msg.reply_to_sk.map(|sk| Ctx {
            reply_to_sk: Some(sk),
            deliver_to_sk: None,
        });
        let id = Uuid::new_v4().to_string();
        let frame = ServerMessage::invoke_client_pubsub(cid.to_string(), id.clone(), data, ctx);
        let text = frame.to_json_with(json_library)?;
        audit
            .record_sent(cid, frame.audit_data(), Some(id), None)
            .await;
        if outbound.send(OutboundFrame::Text(text)).is_err() {
            return Err(WsError::SendFailed);
        }
        delivered += 1;
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AuditEvent, AuditSink};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullAudit;
    #[async_trait]
    impl AuditSink for NullAudit {
        async fn store(&self, _event: AuditEvent) {}
        async fn delete_container(&self, _pub_client_id: &str) {}
    }

    fn no_audit() -> AuditLog {
        AuditLog::new(Arc::new(NullAudit), false, false)
    }

    #[tokio::test]
    async fn delivers_messages_in_submitted_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let messages = vec![
            PubSubMessage {
                payload: PubSubPayload::Value(serde_json::json!({"n": 1})),
                reply_to_sk: None,
            },
            PubSubMessage {
                payload: PubSubPayload::Value(serde_json::json!({"n": 2})),
                reply_to_sk: None,
            },
            PubSubMessage {
                payload: PubSubPayload::Value(serde_json::json!({"n": 3})),
                reply_to_sk: None,
            },
        ];

        let delivered = deliver(&tx, "cid-1", messages, JsonLibrary::Default, &no_audit())
            .await
            .unwrap();
        assert_eq!(delivered, 3);

        for expected in [1, 2, 3] {
            let frame = rx.try_recv().unwrap();
            let OutboundFrame::Text(text) = frame else {
                panic!("expected a text frame")
            };
            let v: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v["data"]["n"], expected);
        }
    }

    #[tokio::test]
    async fn reply_to_sk_is_carried_into_ctx() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let messages = vec![PubSubMessage {
            payload: PubSubPayload::Value(serde_json::json!({})),
            reply_to_sk: Some("sk-9".into()),
        }];
        deliver(&tx, "cid-1", messages, JsonLibrary::Default, &no_audit())
            .await
            .unwrap();
        let OutboundFrame::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected a text frame")
        };
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["meta"]["ctx"]["reply_to_sk"], "sk-9");
    }

    #[tokio::test]
    async fn pre_serialized_payload_is_embedded_as_data() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let messages = vec![PubSubMessage {
            payload: PubSubPayload::PreSerialized(r#"{"already":"json"}"#.into()),
            reply_to_sk: None,
        }];
        deliver(&tx, "cid-1", messages, JsonLibrary::Default, &no_audit())
            .await
            .unwrap();
        let OutboundFrame::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected a text frame")
        };
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["data"]["already"], "json");
    }

    #[tokio::test]
    async fn send_on_closed_channel_returns_send_failed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let messages = vec![PubSubMessage {
            payload: PubSubPayload::Value(serde_json::json!({})),
            reply_to_sk: None,
        }];
        let result = deliver(&tx, "cid-1", messages, JsonLibrary::Default, &no_audit()).await;
        assert!(matches!(result, Err(WsError::SendFailed)));
    }

    #[tokio::test]
    async fn delivered_messages_are_recorded_in_the_audit_log() {
        #[derive(Default)]
        struct RecordingSink {
            events: std::sync::Mutex<Vec<AuditEvent>>,
        }
        #[async_trait]
        impl AuditSink for RecordingSink {
            async fn store(&self, event: AuditEvent) {
                self.events.lock().unwrap().push(event);
            }
            async fn delete_container(&self, _pub_client_id: &str) {}
        }

        let sink = Arc::new(RecordingSink::default());
        let audit = AuditLog::new(sink.clone(), true, true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let messages = vec![PubSubMessage {
            payload: PubSubPayload::Value(serde_json::json!({"n": 1})),
            reply_to_sk: None,
        }];
        deliver(&tx, "cid-1", messages, JsonLibrary::Default, &audit)
            .await
            .unwrap();
        let _ = rx.try_recv().unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, serde_json::json!({"n": 1}));
    }
}
