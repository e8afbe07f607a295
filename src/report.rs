use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Footfall for one hourly bucket, as posted to the footfall API.
///
/// Serializes as `{"date": "2024-05-17", "hour": 14, "footfall": 42}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FootfallRecord {
    #[serde(with = "date_format")]
    pub date: NaiveDate,
    /// Hour of day, 0-23
    pub hour: u32,
    pub footfall: u64,
}

impl FootfallRecord {
    /// Bucket `footfall` under the date and hour of `at`.
    pub fn new<Tz: TimeZone>(at: &DateTime<Tz>, footfall: u64) -> Self {
        Self {
            date: at.date_naive(),
            hour: at.hour(),
            footfall,
        }
    }

    /// Record stamped with the current local time.
    pub fn now(footfall: u64) -> Self {
        Self::new(&Local::now(), footfall)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

mod date_format {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}
