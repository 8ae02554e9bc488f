// Reading history windows and per-metric averages

use crate::sensor::{Metric, SensorValues, StoredReading};
use crate::storage::ReadingFilter;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Preset look-back windows for history views
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRange {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl HistoryRange {
    /// Parses a range option, falling back to 24 hours for anything unknown.
    pub fn parse_or_default(option: Option<&str>) -> Self {
        match option {
            Some("1h") => HistoryRange::OneHour,
            Some("6h") => HistoryRange::SixHours,
            Some("12h") => HistoryRange::TwelveHours,
            Some("24h") => HistoryRange::Day,
            Some("7d") => HistoryRange::Week,
            Some("30d") => HistoryRange::Month,
            _ => HistoryRange::default(),
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            HistoryRange::OneHour => Duration::hours(1),
            HistoryRange::SixHours => Duration::hours(6),
            HistoryRange::TwelveHours => Duration::hours(12),
            HistoryRange::Day => Duration::hours(24),
            HistoryRange::Week => Duration::days(7),
            HistoryRange::Month => Duration::days(30),
        }
    }

    /// Chronological reading filter for one block ending at `now`.
    pub fn filter(&self, block_id: i64, now: DateTime<Utc>) -> ReadingFilter {
        ReadingFilter {
            block_id: Some(block_id),
            since: Some(now - self.duration()),
            until: Some(now),
            ascending: true,
            ..Default::default()
        }
    }
}

/// Aggregate view over a set of readings
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistorySummary {
    pub data_points: usize,
    /// Per-metric means; all zero when there are no readings
    pub averages: SensorValues,
}

pub fn summarize(readings: &[StoredReading]) -> HistorySummary {
    let mut averages = SensorValues {
        temperature: 0.0,
        humidity: 0.0,
        ammonia: 0.0,
        feed_level: 0.0,
        water_level: 0.0,
        activity_level: 0.0,
    };

    if !readings.is_empty() {
        let n = readings.len() as f64;
        let mean = |metric: Metric| {
            readings
                .iter()
                .map(|r| r.reading.values.get(metric))
                .sum::<f64>()
                / n
        };
        averages = SensorValues {
            temperature: mean(Metric::Temperature),
            humidity: mean(Metric::Humidity),
            ammonia: mean(Metric::Ammonia),
            feed_level: mean(Metric::FeedLevel),
            water_level: mean(Metric::WaterLevel),
            activity_level: mean(Metric::ActivityLevel),
        };
    }

    HistorySummary {
        data_points: readings.len(),
        averages,
    }
}
