use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::SystemTime;

/// A Unix timestamp represented as a `u64`.
///
/// Encodes the number of seconds since the Unix epoch (1970-01-01T00:00:00Z).
/// Payment payloads use it for the hard `validUntil` expiry, requirements for
/// the optional `expiresAt` deadline. Serialized as a plain JSON number,
/// matching the canonical digest form of the signed payment intent.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimestamp(u64);

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time. Returns `None` if the system clock reads
    /// before the Unix epoch; callers treat that as an internal fault.
    pub fn now() -> Option<Self> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .ok()?
            .as_secs();
        Some(Self(now))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_number() {
        let ts = UnixTimestamp::from_secs(1699999999);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1699999999");
        let back: UnixTimestamp = serde_json::from_str("1699999999").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn ordering_follows_seconds() {
        assert!(UnixTimestamp::from_secs(10) < UnixTimestamp::from_secs(11));
        assert_eq!(UnixTimestamp::from_secs(10) + 5, UnixTimestamp::from_secs(15));
    }
}
