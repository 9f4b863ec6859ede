use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A UTC instant rendered the two ways reports and rollups record time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// `YYYY-MM-DD HH:MM:SS`
    pub utc: String,
    /// `YYYY-MM-DD`
    pub date: String,
}

impl Stamp {
    pub fn now() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(t: OffsetDateTime) -> Self {
        let date = format!("{:04}-{:02}-{:02}", t.year(), u8::from(t.month()), t.day());
        let utc = format!("{} {:02}:{:02}:{:02}", date, t.hour(), t.minute(), t.second());
        Stamp { utc, date }
    }

    pub fn from_unix(secs: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp(secs).ok().map(Self::from_datetime)
    }
}

/// Render fractional unix seconds (as found in TLS validity windows) as RFC 3339.
pub fn unix_to_rfc3339(secs: f64) -> Option<String> {
    if !secs.is_finite() {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(secs.trunc() as i64)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
}
