//! Ramp distributions of request rates.
//!
//! A [`Distribution`] is an ordered list of [`Level`]s. Each level is a target rate that is
//! reached, by linear interpolation, `delta_minutes` after the previous level. The ramp
//! implicitly starts at a rate of zero at time zero.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::request::validate_name;

/// One point of a ramp.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLevel")]
pub struct Level {
    /// Target request rate in requests per second.
    pub rate: f64,
    /// Time in minutes after the previous level at which `rate` is reached.
    pub delta_minutes: f64,
}

impl Level {
    /// Creates a validated level.
    ///
    /// The duration must be strictly positive and the rate must not be negative.
    pub fn new(rate: f64, delta_minutes: f64) -> Result<Self, ConfigError> {
        let level = Self {
            rate,
            delta_minutes,
        };
        level.validate()?;
        Ok(level)
    }

    /// Checks the invariants of a level that was constructed field by field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.delta_minutes.is_finite() && self.delta_minutes > 0.0) {
            return Err(ConfigError::InvalidDuration(self.delta_minutes));
        }
        if !(self.rate.is_finite() && self.rate >= 0.0) {
            return Err(ConfigError::InvalidRate(self.rate));
        }
        Ok(())
    }

    /// Returns the duration of the ramp leading up to this level in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.delta_minutes * 60.0
    }
}

#[derive(Deserialize)]
struct RawLevel {
    rate: f64,
    delta_minutes: f64,
}

impl TryFrom<RawLevel> for Level {
    type Error = ConfigError;

    fn try_from(raw: RawLevel) -> Result<Self, Self::Error> {
        Level::new(raw.rate, raw.delta_minutes)
    }
}

/// A named, immutable ramp of request rates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDistribution")]
pub struct Distribution {
    name: String,
    levels: Vec<Level>,
}

#[derive(Deserialize)]
struct RawDistribution {
    name: String,
    levels: Vec<Level>,
}

impl TryFrom<RawDistribution> for Distribution {
    type Error = ConfigError;

    fn try_from(raw: RawDistribution) -> Result<Self, Self::Error> {
        Distribution::new(raw.name, raw.levels)
    }
}

impl Distribution {
    /// Creates a distribution from validated levels.
    pub fn new(name: impl Into<String>, levels: Vec<Level>) -> Result<Self, ConfigError> {
        let distribution = Self {
            name: name.into(),
            levels,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Convenience constructor from `(rate, delta_minutes)` pairs.
    pub fn ramp(
        name: impl Into<String>,
        levels: impl IntoIterator<Item = (f64, f64)>,
    ) -> Result<Self, ConfigError> {
        let levels = levels
            .into_iter()
            .map(|(rate, delta)| Level::new(rate, delta))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, levels)
    }

    /// Checks the invariants of a deserialized distribution.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("distribution", &self.name)?;
        self.levels.iter().try_for_each(Level::validate)
    }

    /// Returns the name of the distribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the levels in ramp order.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Returns the total duration of all levels in seconds.
    pub fn total_secs(&self) -> f64 {
        self.levels.iter().map(Level::duration_secs).sum()
    }

    /// Returns the total duration of all levels.
    pub fn total_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_secs())
    }

    /// Returns the highest rate reached anywhere in the ramp.
    pub fn peak_rate(&self) -> f64 {
        self.levels.iter().map(|l| l.rate).fold(0.0, f64::max)
    }

    /// Returns a copy of this distribution with every rate divided by `nodes`.
    ///
    /// When a profile is spread over several nodes, each node runs this scaled ramp so that
    /// the aggregate rate matches the original.
    pub fn split_across(&self, nodes: usize) -> Self {
        let nodes = nodes.max(1) as f64;
        Self {
            name: self.name.clone(),
            levels: self
                .levels
                .iter()
                .map(|level| Level {
                    rate: level.rate / nodes,
                    delta_minutes: level.delta_minutes,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialization_validates_levels() {
        let level: Level = serde_json::from_str(r#"{"rate": 2.5, "delta_minutes": 1.0}"#).unwrap();
        assert_eq!(level, Level::new(2.5, 1.0).unwrap());

        let err = serde_json::from_str::<Level>(r#"{"rate": 2.5, "delta_minutes": 0.0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid level duration"), "{err}");

        let ramp = Distribution::ramp("ramp", [(1.0, 1.0), (4.0, 2.0)]).unwrap();
        let json = serde_json::to_string(&ramp).unwrap();
        assert_eq!(serde_json::from_str::<Distribution>(&json).unwrap(), ramp);

        let bad_name = r#"{"name": "", "levels": [{"rate": 1.0, "delta_minutes": 1.0}]}"#;
        assert!(serde_json::from_str::<Distribution>(bad_name).is_err());
        let bad_level = r#"{"name": "ramp", "levels": [{"rate": -1.0, "delta_minutes": 1.0}]}"#;
        assert!(serde_json::from_str::<Distribution>(bad_level).is_err());
    }

    #[test]
    fn rejects_zero_duration() {
        assert_eq!(
            Level::new(10.0, 0.0),
            Err(ConfigError::InvalidDuration(0.0))
        );
        assert!(Level::new(10.0, -1.0).is_err());
        assert!(Level::new(-1.0, 1.0).is_err());
        assert!(Distribution::ramp("ramp", [(10.0, 1.0), (5.0, 0.0)]).is_err());
    }

    #[test]
    fn total_duration_sums_levels() {
        let dist = Distribution::ramp("ramp", [(10.0, 1.0), (10.0, 5.0)]).unwrap();
        assert_eq!(dist.total_secs(), 360.0);
        assert_eq!(dist.total_duration(), Duration::from_secs(360));
        assert_eq!(dist.peak_rate(), 10.0);
    }

    #[test]
    fn split_divides_rates_only() {
        let dist = Distribution::ramp("ramp", [(10.0, 1.0), (4.0, 2.0)]).unwrap();
        let split = dist.split_across(4);
        assert_eq!(split.levels()[0], Level::new(2.5, 1.0).unwrap());
        assert_eq!(split.levels()[1], Level::new(1.0, 2.0).unwrap());
        assert_eq!(split.total_secs(), dist.total_secs());
    }

    #[test]
    fn rejects_invalid_name() {
        assert!(Distribution::ramp("my ramp", [(1.0, 1.0)]).is_err());
    }
}
