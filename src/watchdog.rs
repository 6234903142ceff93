use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Session Watchdog (§4.5). Waits for either `has_session_opened` to flip
/// true or `deadline` to elapse, whichever comes first.
///
/// Driven by a `Notify` the Connection fires the instant authentication
/// succeeds, rather than polling `has_session_opened` on a timer. `Notify`
/// stores a single wakeup permit, so a call to `notify_one()` that happens
/// before this function starts waiting is not lost — the check of
/// `has_session_opened` up front additionally covers the case where
/// authentication completed (and the notification already fired) before the
/// watchdog task got scheduled at all.
pub async fn await_session_or_timeout(
    has_session_opened: Arc<AtomicBool>,
    notify: Arc<Notify>,
    deadline: Duration,
) -> bool {
    if has_session_opened.load(Ordering::SeqCst) {
        return true;
    }
    tokio::select! {
        _ = notify.notified() => true,
        _ = tokio::time::sleep(deadline) => has_session_opened.load(Ordering::SeqCst),
    }
}
