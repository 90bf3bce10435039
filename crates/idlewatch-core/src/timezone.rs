use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;

const LAST_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Timezone that defines calendar days and wall-clock formatting for a deployment.
pub enum DeploymentTimezone {
    #[default]
    Local,
    Named(Tz),
}

impl DeploymentTimezone {
    /// Parses an IANA timezone name. Empty input and `local` select the host zone.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        trimmed
            .parse::<Tz>()
            .map(Self::Named)
            .map_err(|_| anyhow!("unknown timezone '{trimmed}'"))
    }

    pub fn name(&self) -> String {
        match self {
            Self::Local => "local".to_string(),
            Self::Named(tz) => tz.name().to_string(),
        }
    }

    /// Wall-clock date and time for `unix_secs` in this zone.
    pub fn local_datetime(&self, unix_secs: u64) -> Option<NaiveDateTime> {
        let secs = i64::try_from(unix_secs).ok()?;
        let utc = DateTime::<Utc>::from_timestamp(secs, 0)?;
        Some(match self {
            Self::Local => utc.with_timezone(&Local).naive_local(),
            Self::Named(tz) => utc.with_timezone(tz).naive_local(),
        })
    }

    /// Formats `unix_secs` as `YYYY-MM-DD HH:MM:SS`, falling back to the raw
    /// number when the instant is out of range.
    pub fn format_unix_seconds(&self, unix_secs: u64) -> String {
        self.local_datetime(unix_secs)
            .map(|datetime| datetime.format(LAST_SEEN_FORMAT).to_string())
            .unwrap_or_else(|| unix_secs.to_string())
    }
}
