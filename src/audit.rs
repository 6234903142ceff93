use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::host::{AuditEvent, AuditEventKind, AuditSink};

/// Emits §4.9 audit events through a host-provided `AuditSink`, gated per
/// direction by the channel's `is_audit_log_sent_active` /
/// `is_audit_log_received_active` configuration.
///
/// Cheap to clone: the sink is an `Arc`, so every task that needs to emit
/// events (the reader loop, the pinger, pub/sub delivery) can hold its own
/// handle to the same underlying log.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    sent_active: bool,
    received_active: bool,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>, sent_active: bool, received_active: bool) -> Self {
        Self {
            sink,
            sent_active,
            received_active,
        }
    }

    pub async fn record_received(
        &self,
        object_id: &str,
        data: Value,
        msg_id: Option<String>,
        in_reply_to: Option<String>,
    ) {
        if !self.received_active {
            return;
        }
        self.sink
            .store(AuditEvent {
                kind: AuditEventKind::Received,
                object_id: object_id.to_string(),
                data,
                timestamp: Utc::now(),
                msg_id,
                in_reply_to,
            })
            .await;
    }

    pub async fn record_sent(
        &self,
        object_id: &str,
        data: Value,
        msg_id: Option<String>,
        in_reply_to: Option<String>,
    ) {
        if !self.sent_active {
            return;
        }
        self.sink
            .store(AuditEvent {
                kind: AuditEventKind::Sent,
                object_id: object_id.to_string(),
                data,
                timestamp: Utc::now(),
                msg_id,
                in_reply_to,
            })
            .await;
    }

    pub async fn delete_container(&self, object_id: &str) {
        self.sink.delete_container(object_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn store(&self, event: AuditEvent) {
            self.events.lock().unwrap().push(event);
        }
        async fn delete_container(&self, pub_client_id: &str) {
            self.deletes.lock().unwrap().push(pub_client_id.to_string());
        }
    }

    #[tokio::test]
    async fn inactive_direction_is_suppressed() {
        let sink = Arc::new(RecordingSink::default());
        let log = AuditLog::new(sink.clone(), false, true);
        log.record_sent("ws.1", serde_json::json!({}), None, None).await;
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_direction_records_an_event() {
        let sink = Arc::new(RecordingSink::default());
        let log = AuditLog::new(sink.clone(), true, true);
        log.record_received("ws.1", serde_json::json!({"a":1}), Some("m1".into()), None)
            .await;
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_id, "ws.1");
    }

    #[tokio::test]
    async fn delete_container_forwards_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let log = AuditLog::new(sink.clone(), true, true);
        log.delete_container("ws.1").await;
        assert_eq!(sink.deletes.lock().unwrap().as_slice(), ["ws.1".to_string()]);
    }
}
