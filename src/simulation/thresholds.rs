use crate::sensor::{AlertEvent, Breach, Metric, Reading};

/// Acceptable band for one metric. `None` means unbounded on that side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdRule {
    pub metric: Metric,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

pub const THRESHOLDS: [ThresholdRule; 6] = [
    ThresholdRule {
        metric: Metric::Temperature,
        low: Some(28.0),
        high: Some(34.0),
    },
    ThresholdRule {
        metric: Metric::Humidity,
        low: None,
        high: Some(85.0),
    },
    ThresholdRule {
        metric: Metric::Ammonia,
        low: None,
        high: Some(25.0),
    },
    ThresholdRule {
        metric: Metric::FeedLevel,
        low: Some(20.0),
        high: None,
    },
    ThresholdRule {
        metric: Metric::WaterLevel,
        low: Some(20.0),
        high: None,
    },
    ThresholdRule {
        metric: Metric::ActivityLevel,
        low: Some(30.0),
        high: None,
    },
];

impl ThresholdRule {
    /// Strict comparison: a value equal to a bound is in range.
    pub fn check(&self, value: f64) -> Option<Breach> {
        if self.low.is_some_and(|low| value < low) {
            return Some(Breach::Low);
        }
        if self.high.is_some_and(|high| value > high) {
            return Some(Breach::High);
        }
        None
    }
}

/// Maps a reading to one alert per breached bound.
///
/// Stateless: a breach that persists across ticks raises a new alert every
/// tick.
pub fn evaluate(reading: &Reading) -> Vec<AlertEvent> {
    THRESHOLDS
        .iter()
        .filter_map(|rule| {
            rule.check(reading.values.get(rule.metric))
                .map(|breach| AlertEvent::new(reading, rule.metric, breach))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorValues;
    use chrono::Utc;

    fn mid_range() -> SensorValues {
        SensorValues {
            temperature: 31.0,
            humidity: 65.0,
            ammonia: 12.0,
            feed_level: 80.0,
            water_level: 80.0,
            activity_level: 70.0,
        }
    }

    fn reading(values: SensorValues) -> Reading {
        Reading {
            block_id: 1,
            owner_id: 1,
            timestamp: Utc::now(),
            values,
        }
    }

    #[test]
    fn test_mid_range_reading_raises_nothing() {
        assert!(evaluate(&reading(mid_range())).is_empty());
    }

    #[test]
    fn test_high_temperature() {
        let alerts = evaluate(&reading(SensorValues {
            temperature: 35.0,
            ..mid_range()
        }));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "temperature too high");
        assert_eq!(alerts[0].metric, Metric::Temperature);
        assert_eq!(alerts[0].breach, Breach::High);
    }

    #[test]
    fn test_low_feed() {
        let alerts = evaluate(&reading(SensorValues {
            feed_level: 15.0,
            ..mid_range()
        }));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "feed_level too low");
        assert_eq!(alerts[0].message, "Feed level too low: 15.0");
    }

    #[test]
    fn test_bounds_are_exclusive() {
        let alerts = evaluate(&reading(SensorValues {
            temperature: 34.0,
            humidity: 85.0,
            ammonia: 25.0,
            feed_level: 20.0,
            water_level: 20.0,
            activity_level: 30.0,
        }));
        assert!(alerts.is_empty());

        let alerts = evaluate(&reading(SensorValues {
            temperature: 27.9,
            ..mid_range()
        }));
        assert_eq!(alerts[0].category, "temperature too low");
    }

    #[test]
    fn test_every_breach_reported_independently() {
        let alerts = evaluate(&reading(SensorValues {
            temperature: 36.0,
            humidity: 88.0,
            ammonia: 30.0,
            feed_level: 5.0,
            water_level: 0.0,
            activity_level: 10.0,
        }));

        let mut categories: Vec<&str> = alerts.iter().map(|a| a.category.as_str()).collect();
        categories.sort();
        assert_eq!(
            categories,
            vec![
                "activity_level too low",
                "ammonia too high",
                "feed_level too low",
                "humidity too high",
                "temperature too high",
                "water_level too low",
            ]
        );
    }
}
