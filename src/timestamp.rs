use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, SystemTimeError};

/// A Unix timestamp in milliseconds, the protocol's anti-replay primitive.
///
/// Wire frames carry a 13-digit `ts_ms` field; this type keeps the
/// freshness check at the frame boundary so internal code can assume
/// timestamps are already trustworthy by the time they reach a handler.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnixMillis(pub u64);

impl Serialize for UnixMillis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for UnixMillis {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = u64::deserialize(deserializer)?;
        Ok(UnixMillis(v))
    }
}

impl Display for UnixMillis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl UnixMillis {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_millis() as u64;
        Ok(Self(now))
    }

    /// `true` if this timestamp is within `expiry_secs` of now, in either
    /// direction. A frame further in the future than the expiry window is
    /// rejected the same as a stale one — clock skew is not trusted.
    pub fn is_fresh(&self, expiry_secs: u64) -> bool {
        let Ok(now) = UnixMillis::try_now() else {
            return false;
        };
        let window_ms = expiry_secs.saturating_mul(1000);
        now.0.abs_diff(self.0) <= window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timestamp_passes() {
        let now = UnixMillis::try_now().unwrap();
        assert!(now.is_fresh(60));
    }

    #[test]
    fn stale_timestamp_fails() {
        let now = UnixMillis::try_now().unwrap();
        let stale = UnixMillis(now.0 - 61_000);
        assert!(!stale.is_fresh(60));
    }

    #[test]
    fn future_timestamp_beyond_window_fails() {
        let now = UnixMillis::try_now().unwrap();
        let future = UnixMillis(now.0 + 61_000);
        assert!(!future.is_fresh(60));
    }
}
