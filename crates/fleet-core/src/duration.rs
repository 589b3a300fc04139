//! Human-readable durations ("10s", "5m", "250ms").

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A `Duration` that round-trips through documents as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<HumanDuration> for Duration {
    fn from(d: HumanDuration) -> Self {
        d.0
    }
}

impl FromStr for HumanDuration {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "0" {
            return Ok(Self::default());
        }
        humantime::parse_duration(s)
            .map(Self)
            .map_err(|e| CoreError::Duration {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_zero() {
            return f.write_str("0s");
        }
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_units() {
        assert_eq!("10s".parse::<HumanDuration>().unwrap(), HumanDuration::from_secs(10));
        assert_eq!("5m".parse::<HumanDuration>().unwrap(), HumanDuration::from_secs(300));
        assert_eq!(
            "250ms".parse::<HumanDuration>().unwrap(),
            HumanDuration::from_millis(250)
        );
        assert!("0".parse::<HumanDuration>().unwrap().is_zero());
    }

    #[test]
    fn rejects_garbage() {
        let err = "soon".parse::<HumanDuration>().unwrap_err();
        assert!(matches!(err, CoreError::Duration { .. }));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&HumanDuration::from_secs(90)).unwrap();
        assert_eq!(json, "\"1m 30s\"");
        let back: HumanDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, HumanDuration::from_secs(90));
    }
}
