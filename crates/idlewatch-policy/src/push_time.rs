use std::fmt;

use anyhow::{bail, Context, Result};

const FULL_WIDTH_COLON: char = '\u{ff1a}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Daily fire time for the digest, in deployment-local wall clock.
pub struct PushTime {
    hour: u32,
    minute: u32,
}

impl PushTime {
    pub const DEFAULT: PushTime = PushTime { hour: 9, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour >= 24 {
            bail!("hour {hour} is out of range 0..=23");
        }
        if minute >= 60 {
            bail!("minute {minute} is out of range 0..=59");
        }
        Ok(Self { hour, minute })
    }

    /// Parses `HH:MM`, accepting the full-width colon used by CJK input methods.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().replace(FULL_WIDTH_COLON, ":");
        let Some((hour_raw, minute_raw)) = normalized.split_once(':') else {
            bail!("push time '{raw}' is missing a ':' separator");
        };
        let hour = hour_raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("push time '{raw}' has an invalid hour"))?;
        let minute = minute_raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("push time '{raw}' has an invalid minute"))?;
        Self::new(hour, minute).with_context(|| format!("push time '{raw}' is out of range"))
    }

    pub fn hour(self) -> u32 {
        self.hour
    }

    pub fn minute(self) -> u32 {
        self.minute
    }

    pub fn minutes_of_day(self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl Default for PushTime {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PushTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
