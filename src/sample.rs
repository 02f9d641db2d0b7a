//! Immutable measurement samples.
//!
//! A [`Sample`] is one timestamped value with an optional statistics block
//! (min/max/stddev, as delivered by optimizing archive readers), a quality
//! tag and a source label. Samples are never mutated after creation; a
//! "changed" sample is a new `Sample` replacing the old one in a series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source label for samples appended from the live subscription.
pub const SOURCE_LIVE: &str = "Live";
/// Source label for samples produced by formula evaluation.
pub const SOURCE_FORMULA: &str = "Formula";

/// Build the source label for samples merged from an archive server.
pub fn archive_source(server_name: &str) -> String {
    format!("Archive:{server_name}")
}

/// Quality/alarm tag attached to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// Normal reading.
    Ok,
    /// Minor alarm.
    Minor,
    /// Major alarm.
    Major,
    /// Value is not usable (e.g. NaN formula result).
    Invalid,
    /// Transport reported loss of connection; value is a marker, not data.
    Disconnected,
    /// Client-side annotation (formula status etc.).
    Client,
}

impl Quality {
    /// A sample counts as "valid" for the live extension unless it marks an
    /// invalid or disconnected state.
    pub fn is_valid(self) -> bool {
        !matches!(self, Quality::Invalid | Quality::Disconnected)
    }
}

/// Optional per-sample statistics from optimized archive retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

/// One immutable timestamped measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    time: DateTime<Utc>,
    value: f64,
    stats: Option<SampleStats>,
    quality: Quality,
    info: Option<String>,
    source: String,
}

impl Sample {
    /// Plain scalar sample.
    pub fn new(source: impl Into<String>, time: DateTime<Utc>, value: f64, quality: Quality) -> Self {
        Self {
            time,
            value,
            stats: None,
            quality,
            info: None,
            source: source.into(),
        }
    }

    /// Sample carrying an archive statistics block.
    pub fn with_stats(
        source: impl Into<String>,
        time: DateTime<Utc>,
        value: f64,
        stats: SampleStats,
        quality: Quality,
    ) -> Self {
        Self {
            time,
            value,
            stats: Some(stats),
            quality,
            info: None,
            source: source.into(),
        }
    }

    /// Marker sample for a lost transport connection.
    pub fn disconnected(source: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            time,
            value: f64::NAN,
            stats: None,
            quality: Quality::Disconnected,
            info: Some("Disconnected".into()),
            source: source.into(),
        }
    }

    /// Attach free-text info (status message, alarm text).
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// Clone of this sample with its timestamp replaced.
    pub fn at_time(&self, time: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.time = time;
        copy
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn stats(&self) -> Option<SampleStats> {
        self.stats
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Absolute time range requested for display, used by the history refresh
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// New range; `start` must lie before `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quality_validity() {
        assert!(Quality::Ok.is_valid());
        assert!(Quality::Minor.is_valid());
        assert!(Quality::Major.is_valid());
        assert!(Quality::Client.is_valid());
        assert!(!Quality::Invalid.is_valid());
        assert!(!Quality::Disconnected.is_valid());
    }

    #[test]
    fn at_time_keeps_everything_else() {
        let t0 = Utc.timestamp_opt(100, 0).unwrap();
        let t1 = Utc.timestamp_opt(200, 0).unwrap();
        let s = Sample::with_stats(
            SOURCE_LIVE,
            t0,
            1.5,
            SampleStats { min: 1.0, max: 2.0, stddev: 0.1 },
            Quality::Ok,
        );
        let moved = s.at_time(t1);
        assert_eq!(moved.time(), t1);
        assert_eq!(moved.value(), 1.5);
        assert_eq!(moved.stats(), s.stats());
        assert_eq!(moved.quality(), Quality::Ok);
    }

    #[test]
    fn time_range_rejects_inverted() {
        let t0 = Utc.timestamp_opt(100, 0).unwrap();
        let t1 = Utc.timestamp_opt(200, 0).unwrap();
        assert!(TimeRange::new(t0, t1).is_some());
        assert!(TimeRange::new(t1, t0).is_none());
        assert!(TimeRange::new(t0, t0).is_none());
    }
}
