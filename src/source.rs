//! Abstractions over the control-system data sources.
//!
//! A [`LiveSource`] delivers decoded value updates for named channels;
//! a concrete implementation bridges to the actual protocol client. The
//! model only depends on the callback contract here, so tests inject a
//! scripted source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::Quality;

/// One decoded value update as delivered by the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    pub time: DateTime<Utc>,
    pub value: f64,
    pub quality: Quality,
    /// Engineering unit, if the protocol carries one.
    pub unit: Option<String>,
    /// Free-form status text shown alongside the sample.
    pub info: Option<String>,
}

/// Connection-level event for one subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Value(DecodedValue),
    Disconnected { time: DateTime<Utc> },
}

/// Active subscription handle; dropping it unsubscribes.
pub trait Subscription: Send {}

/// Provider of live channel updates.
pub trait LiveSource: Send + Sync {
    /// Subscribe to updates for `name`. The listener is invoked from the
    /// source's own thread for every event until the returned handle is
    /// dropped.
    fn subscribe(
        &self,
        name: &str,
        listener: Box<dyn Fn(LiveEvent) + Send + Sync>,
    ) -> Box<dyn Subscription>;
}

/// Reference to one archive server holding history for a channel.
///
/// Identity is the URL alone: the display name is cosmetic and two entries
/// with the same URL point at the same data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveDataSource {
    pub url: String,
    pub name: String,
}

impl ArchiveDataSource {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for ArchiveDataSource {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for ArchiveDataSource {}
