use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Rate-limits last-seen updates against the host DB (§4.12). The first
/// interaction is always recorded immediately; subsequent ones are flushed
/// only once `interact_update_interval` has elapsed since the last flush,
/// bounding write amplification on chatty connections (e.g. every accepted
/// frame, every pong).
pub struct InteractionRecorder {
    interval: Duration,
    last_flush: Mutex<Option<DateTime<Utc>>>,
}

impl InteractionRecorder {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: Mutex::new(None),
        }
    }

    /// Record an interaction at `now`. Returns `true` if the caller should
    /// actually flush the two host updates named in §4.12 (the pub/sub
    /// interaction-metadata update and the WSX `set-last-seen` update).
    pub fn should_flush(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_flush.lock().unwrap();
        let due = match *last {
            None => true,
            Some(prev) => {
                now.signed_duration_since(prev)
                    >= chrono::Duration::from_std(self.interval).unwrap_or_default()
            }
        };
        if due {
            *last = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_interaction_always_flushes() {
        let r = InteractionRecorder::new(Duration::from_secs(30));
        assert!(r.should_flush(Utc::now()));
    }

    #[test]
    fn rapid_second_interaction_is_suppressed() {
        let r = InteractionRecorder::new(Duration::from_secs(30));
        let t0 = Utc::now();
        assert!(r.should_flush(t0));
        assert!(!r.should_flush(t0 + chrono::Duration::seconds(1)));
    }

    #[test]
    fn interaction_after_interval_flushes_again() {
        let r = InteractionRecorder::new(Duration::from_secs(30));
        let t0 = Utc::now();
        assert!(r.should_flush(t0));
        assert!(r.should_flush(t0 + chrono::Duration::seconds(31)));
    }
}
