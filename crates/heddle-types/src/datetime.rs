//! RFC 3339 timestamps

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use std::fmt;
use std::str::FromStr;

/// Wall-clock timestamp, serialized as an RFC 3339 string with microsecond
/// precision in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Datetime(DateTime<Utc>);

impl Datetime {
    /// The current wall-clock time, truncated to microsecond precision so
    /// values round-trip unchanged through their wire encoding.
    pub fn now() -> Self {
        let micros = Utc::now().timestamp_micros();
        Self(DateTime::from_timestamp_micros(micros).expect("current time in range"))
    }

    /// Wrap an existing chrono timestamp.
    pub fn new(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// The inner chrono timestamp.
    pub fn as_inner(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// RFC 3339 rendering with microsecond precision.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl FromStr for Datetime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)))
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Datetime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Datetime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: &str = Deserialize::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}
