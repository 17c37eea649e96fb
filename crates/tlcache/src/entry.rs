//! Cache entry metadata

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// When a cache entry stops being live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// The entry never expires
    Never,
    /// The entry is stale from this instant on
    At(SystemTime),
}

impl Expiration {
    /// Resolve a requested timeout against a tier's default
    ///
    /// `None` uses `default`; a zero duration (requested or default) never
    /// expires.
    pub fn from_timeout(timeout: Option<Duration>, default: Duration) -> Self {
        let ttl = timeout.unwrap_or(default);
        if ttl.is_zero() {
            Self::Never
        } else {
            Self::At(SystemTime::now() + ttl)
        }
    }

    /// Check liveness against the current time
    pub fn is_live(&self) -> bool {
        self.is_live_at(SystemTime::now())
    }

    pub fn is_live_at(&self, now: SystemTime) -> bool {
        match self {
            Self::Never => true,
            Self::At(at) => now < *at,
        }
    }

    /// Milliseconds since the Unix epoch, `0` for [`Expiration::Never`]
    pub fn as_millis(&self) -> u64 {
        match self {
            Self::Never => 0,
            Self::At(at) => at
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default()
                .max(1),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        if millis == 0 {
            Self::Never
        } else {
            Self::At(UNIX_EPOCH + Duration::from_millis(millis))
        }
    }
}

/// A stored value and its expiration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub expires: Expiration,
    pub value: serde_json::Value,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, expires: Expiration) -> Self {
        Self { expires, value }
    }

    pub fn is_live(&self) -> bool {
        self.expires.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_never_expires() {
        let expires = Expiration::from_timeout(Some(Duration::ZERO), Duration::from_secs(300));
        assert_eq!(expires, Expiration::Never);
        assert_eq!(expires.as_millis(), 0);
    }

    #[test]
    fn test_zero_default_never_expires() {
        assert_eq!(Expiration::from_timeout(None, Duration::ZERO), Expiration::Never);
    }

    #[test]
    fn test_default_timeout_is_used() {
        let now = SystemTime::now();
        let expires = Expiration::from_timeout(None, Duration::from_secs(10));
        assert!(expires.is_live_at(now + Duration::from_secs(5)));
        assert!(!expires.is_live_at(now + Duration::from_secs(11)));
    }

    #[test]
    fn test_expiry_boundary() {
        let at = UNIX_EPOCH + Duration::from_secs(1_000);
        let expires = Expiration::At(at);

        assert!(expires.is_live_at(at - Duration::from_millis(1)));
        assert!(!expires.is_live_at(at));
        assert!(!expires.is_live_at(at + Duration::from_millis(1)));
    }

    #[test]
    fn test_millis_round_trip_truncates() {
        let at = UNIX_EPOCH + Duration::from_micros(1_234_567);
        let restored = Expiration::from_millis(Expiration::At(at).as_millis());
        assert_eq!(restored, Expiration::At(UNIX_EPOCH + Duration::from_millis(1_234)));
    }

    #[tokio::test]
    async fn test_entry_expiration() {
        let entry = CacheEntry::new(
            serde_json::json!("data"),
            Expiration::from_timeout(Some(Duration::from_millis(1)), Duration::ZERO),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!entry.is_live());
    }
}
