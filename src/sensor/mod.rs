// Sensor reading and alert types shared by the simulator, storage and API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The six scalar sensor channels of a flock block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorValues {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Parts per million
    pub ammonia: f64,
    /// Percent of feeder capacity
    pub feed_level: f64,
    /// Percent of drinker capacity
    pub water_level: f64,
    /// Percent
    pub activity_level: f64,
}

impl SensorValues {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::Ammonia => self.ammonia,
            Metric::FeedLevel => self.feed_level,
            Metric::WaterLevel => self.water_level,
            Metric::ActivityLevel => self.activity_level,
        }
    }

    /// Copy with every channel rounded to one decimal place.
    pub fn rounded(&self) -> Self {
        Self {
            temperature: round1(self.temperature),
            humidity: round1(self.humidity),
            ammonia: round1(self.ammonia),
            feed_level: round1(self.feed_level),
            water_level: round1(self.water_level),
            activity_level: round1(self.activity_level),
        }
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    Ammonia,
    FeedLevel,
    WaterLevel,
    ActivityLevel,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Ammonia,
        Metric::FeedLevel,
        Metric::WaterLevel,
        Metric::ActivityLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Ammonia => "ammonia",
            Metric::FeedLevel => "feed_level",
            Metric::WaterLevel => "water_level",
            Metric::ActivityLevel => "activity_level",
        }
    }

    /// Human-readable label used in alert messages
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
            Metric::Ammonia => "Ammonia",
            Metric::FeedLevel => "Feed level",
            Metric::WaterLevel => "Water level",
            Metric::ActivityLevel => "Activity level",
        }
    }
}

impl FromStr for Metric {
    type Err = ParseSensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParseSensorError(format!("unknown metric '{}'", s)))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted sample for a block. Values are already rounded to one decimal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub block_id: i64,
    pub owner_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: SensorValues,
}

/// A persisted reading row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Which side of a threshold was crossed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breach {
    Low,
    High,
}

impl Breach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Breach::Low => "low",
            Breach::High => "high",
        }
    }
}

impl FromStr for Breach {
    type Err = ParseSensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Breach::Low),
            "high" => Ok(Breach::High),
            other => Err(ParseSensorError(format!("unknown breach '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseSensorError(String);

impl fmt::Display for ParseSensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseSensorError {}

/// Alert raised when a reading crosses a threshold.
///
/// `resolved` starts false; only an operator action flips it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub block_id: i64,
    pub owner_id: i64,
    pub timestamp: DateTime<Utc>,
    pub metric: Metric,
    pub breach: Breach,
    pub value: f64,
    /// e.g. "temperature too high"
    pub category: String,
    /// e.g. "Temperature too high: 35.2"
    pub message: String,
    pub resolved: bool,
}

impl AlertEvent {
    pub fn new(reading: &Reading, metric: Metric, breach: Breach) -> Self {
        let value = reading.values.get(metric);
        Self {
            block_id: reading.block_id,
            owner_id: reading.owner_id,
            timestamp: reading.timestamp,
            metric,
            breach,
            value,
            category: format!("{} too {}", metric.as_str(), breach.as_str()),
            message: format!("{} too {}: {:.1}", metric.label(), breach.as_str(), value),
            resolved: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: i64,
    #[serde(flatten)]
    pub alert: AlertEvent,
}
