use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

const TOKEN_VALUE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_VALUE_RANDOM_LEN: usize = 32;

/// Per-connection session token (§3 Token). `expires_at` is set at creation
/// to `created_at + ttl`; every extension adds `extend_by` (or `ttl` if not
/// given) to `expires_at`, never to `now` — so extensions compound on the
/// existing deadline rather than resetting it, and `expires_at` is
/// monotonically non-decreasing (§8 "Token extension is monotonic").
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at + chrono::Duration::from_std(ttl).unwrap_or_default();
        Token {
            value: new_token_value(),
            ttl,
            created_at,
            expires_at,
        }
    }

    pub fn extend(&mut self, extend_by: Option<Duration>) {
        let delta = extend_by.unwrap_or(self.ttl);
        self.expires_at += chrono::Duration::from_std(delta).unwrap_or_default();
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

fn new_token_value() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TOKEN_VALUE_RANDOM_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_VALUE_ALPHABET.len());
            TOKEN_VALUE_ALPHABET[idx] as char
        })
        .collect();
    format!("ws.token.{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_has_ws_token_prefix() {
        let t = Token::new(Duration::from_secs(60));
        assert!(t.value.starts_with("ws.token."));
    }

    #[test]
    fn two_tokens_have_different_values() {
        let a = Token::new(Duration::from_secs(60));
        let b = Token::new(Duration::from_secs(60));
        assert_ne!(a.value, b.value);
    }

    #[test]
    fn expires_at_is_created_at_plus_ttl() {
        let t = Token::new(Duration::from_secs(60));
        let expected = t.created_at + chrono::Duration::seconds(60);
        assert_eq!(t.expires_at, expected);
    }

    #[test]
    fn extend_with_explicit_amount_adds_to_expires_at() {
        let mut t = Token::new(Duration::from_secs(60));
        let before = t.expires_at;
        t.extend(Some(Duration::from_secs(30)));
        assert_eq!(t.expires_at, before + chrono::Duration::seconds(30));
    }

    #[test]
    fn extend_without_amount_uses_ttl() {
        let mut t = Token::new(Duration::from_secs(60));
        let before = t.expires_at;
        t.extend(None);
        assert_eq!(t.expires_at, before + chrono::Duration::seconds(60));
    }

    #[test]
    fn extension_is_monotonic_never_decreases() {
        let mut t = Token::new(Duration::from_secs(60));
        let mut last = t.expires_at;
        for _ in 0..5 {
            t.extend(Some(Duration::from_secs(1)));
            assert!(t.expires_at >= last);
            last = t.expires_at;
        }
    }

    #[test]
    fn is_expired_compares_against_wall_clock() {
        let t = Token::new(Duration::from_secs(0));
        assert!(t.is_expired(Utc::now() + chrono::Duration::seconds(1)));
        assert!(!t.is_expired(t.created_at - chrono::Duration::seconds(1)));
    }
}
