//! Crate-wide tunables.
//!
//! These mirror the knobs an embedding application would usually expose in
//! its own preferences; the model only needs sane compiled-in defaults.

use std::time::Duration;

/// Default capacity of a channel's live ring buffer (samples).
pub const LIVE_BUFFER_CAPACITY: usize = 5000;

/// Upper bound for acquiring a series write lock before the operation is
/// abandoned (logged, no mutation applied).
pub const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Scan periods below this are clamped to 0 ("monitor" mode): periodic work
/// faster than 10 Hz is not meaningful at this layer.
pub const MIN_SCAN_PERIOD: f64 = 0.1;

/// Fastest model update (UI tick) period in seconds.
pub const MIN_UPDATE_PERIOD: f64 = 0.1;
