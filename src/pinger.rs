use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::JsonLibrary;
use crate::correlator::{CorrelatedReply, Correlator};
use crate::message::ServerMessage;
use crate::token::Token;
use crate::transport::OutboundFrame;

/// Shared state the Background Pinger (§4.6) needs, handed to it by the
/// Connection that spawns it. Bundled into one struct so the pinger task can
/// be spawned with `tokio::spawn` and own clones of everything it touches,
/// the same way a forwarding task owns its half of an `mpsc` channel.
pub struct PingerContext {
    pub pub_client_id: String,
    pub ping_interval: Duration,
    pub pings_missed_threshold: u32,
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub json_library: JsonLibrary,
    pub correlator: Arc<Correlator>,
    pub pings_missed: Arc<AtomicU32>,
    pub terminated: Arc<AtomicBool>,
    pub token: Arc<Mutex<Option<Token>>>,
    pub audit: AuditLog,
}

/// Reason the pinger loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum PingerExit {
    StreamTerminated,
    PingsMissedThreshold,
    /// A ping iteration panicked (§4.4/§7: "runtime errors in pinger/invoke
    /// (3701/3702/3703)"). The caller closes the connection with `3702`.
    RuntimeError,
}

/// One iteration's outcome, short of a panic (which `run` catches around the
/// call to `ping_once`).
enum PingOutcome {
    Continue,
    StreamTerminated,
    ThresholdReached,
}

/// Run the Background Pinger loop until the connection terminates or the
/// missed-ping threshold is reached (§4.6). Returns the reason it stopped so
/// the caller can close with the right code (`4002` on threshold, `3702` on
/// an unexpected panic inside a ping iteration).
pub async fn run(ctx: PingerContext) -> PingerExit {
    loop {
        tokio::time::sleep(ctx.ping_interval).await;

        if ctx.terminated.load(Ordering::SeqCst) {
            return PingerExit::StreamTerminated;
        }

        match AssertUnwindSafe(ping_once(&ctx)).catch_unwind().await {
            Ok(PingOutcome::Continue) => continue,
            Ok(PingOutcome::StreamTerminated) => return PingerExit::StreamTerminated,
            Ok(PingOutcome::ThresholdReached) => return PingerExit::PingsMissedThreshold,
            Err(_) => return PingerExit::RuntimeError,
        }
    }
}

/// Sends one ping and waits for its pong, up to `ping_interval` (§4.6).
async fn ping_once(ctx: &PingerContext) -> PingOutcome {
    let ping_id = Uuid::new_v4().to_string();
    let frame = ServerMessage::invoke_client(ping_id.clone(), ping_id.clone(), serde_json::Value::Null);
    let text = match frame.to_json_with(ctx.json_library) {
        Ok(t) => t,
        Err(_) => return PingOutcome::Continue,
    };

    let wait = ctx.correlator.wait(ping_id.clone(), ctx.ping_interval);
    ctx.audit
        .record_sent(&ctx.pub_client_id, frame.audit_data(), Some(ping_id), None)
        .await;
    if ctx.outbound.send(OutboundFrame::Text(text)).is_err() {
        return PingOutcome::StreamTerminated;
    }

    match wait.await {
        Some(CorrelatedReply::Pong) | Some(CorrelatedReply::Message(_)) => {
            ctx.pings_missed.store(0, Ordering::SeqCst);
            if let Some(token) = ctx.token.lock().await.as_mut() {
                token.extend(Some(ctx.ping_interval));
            }
            PingOutcome::Continue
        }
        None => {
            let missed = ctx.pings_missed.fetch_add(1, Ordering::SeqCst) + 1;
            if missed >= ctx.pings_missed_threshold {
                PingOutcome::ThresholdReached
            } else {
                PingOutcome::Continue
            }
        }
    }
}
