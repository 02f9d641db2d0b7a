//! Sample series storage and the lock discipline around it.
//!
//! Two storage strategies back the model items:
//! - [`PlainSeries`]: one ordered vector, replaced wholesale on update
//!   (historic-only and formula-derived data).
//! - [`ChannelSeries`]: merged historic block plus a bounded live ring
//!   buffer, composed into one ordered view.
//!
//! [`ExtendedLiveSeries`] decorates any view so a still-valid most recent
//! value visually persists until "now".
//!
//! Every series instance is guarded by a [`SeriesLock`]: readers share the
//! lock, a writer acquires it exclusively with a bounded timeout. Access
//! without a guard is not expressible, so the lock discipline holds at the
//! type level.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::WRITE_LOCK_TIMEOUT;
use crate::merge::{count_before, merge};
use crate::sample::{Sample, TimeRange};

/// Read contract of any sample series: an ordered sequence, index 0..len-1
/// non-decreasing by timestamp.
pub trait SeriesView {
    fn len(&self) -> usize;

    /// Bounds-checked access. Returns an owned sample because decorated
    /// views synthesize samples that are not stored anywhere.
    fn get(&self, index: usize) -> Option<Sample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first(&self) -> Option<Sample> {
        self.get(0)
    }

    fn last(&self) -> Option<Sample> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Clone all samples out, oldest first.
    fn to_vec(&self) -> Vec<Sample> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

/// Ordered backing store replaced wholesale on update.
#[derive(Debug, Default)]
pub struct PlainSeries {
    samples: Vec<Sample>,
}

impl PlainSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire content. `samples` must be time-ordered.
    pub fn set(&mut self, samples: Vec<Sample>) {
        debug_assert!(samples.windows(2).all(|w| w[0].time() <= w[1].time()));
        self.samples = samples;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }
}

impl SeriesView for PlainSeries {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index).cloned()
    }
}

/// Historic block plus live ring buffer, presented as one ordered series.
///
/// The historic block is only ever replaced via [`merge`]. The live ring
/// appends at the "now" end and drops its oldest sample once `capacity` is
/// reached. Where archive data overlaps the live buffer, the live samples
/// win: historic samples at/after the first live timestamp are hidden.
#[derive(Debug)]
pub struct ChannelSeries {
    historic: Vec<Sample>,
    /// Prefix of `historic` that lies strictly before the first live sample.
    hist_visible: usize,
    live: VecDeque<Sample>,
    capacity: usize,
}

impl ChannelSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            historic: Vec::new(),
            hist_visible: 0,
            live: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resize the ring, keeping the most recent samples.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.live.len() > self.capacity {
            self.live.pop_front();
        }
        self.update_border();
    }

    /// Append one live sample at the "now" end, dropping the oldest when
    /// the ring is full.
    pub fn append_live(&mut self, sample: Sample) {
        if self.live.len() == self.capacity {
            self.live.pop_front();
        }
        self.live.push_back(sample);
        self.update_border();
    }

    /// Splice archive data into the historic block.
    pub fn merge_historic(&mut self, add: &[Sample]) {
        self.historic = merge(&self.historic, add);
        self.update_border();
    }

    /// Drop all buffered samples (channel removed from model).
    pub fn clear(&mut self) {
        self.historic.clear();
        self.live.clear();
        self.hist_visible = 0;
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn historic_len(&self) -> usize {
        self.historic.len()
    }

    /// Does the buffered data no longer cover the requested range start?
    ///
    /// True only once the ring has wrapped (older live samples were
    /// dropped) and neither the historic block nor the remaining live
    /// samples reach back to `range.start`; the caller then asks the
    /// archive for a re-fetch.
    pub fn history_refresh_needed(&self, range: TimeRange) -> bool {
        if self.live.len() < self.capacity {
            return false;
        }
        match self.first() {
            Some(earliest) => earliest.time() > range.start,
            None => false,
        }
    }

    fn update_border(&mut self) {
        self.hist_visible = match self.live.front() {
            Some(first_live) => count_before(&self.historic, first_live.time()),
            None => self.historic.len(),
        };
    }
}

impl SeriesView for ChannelSeries {
    fn len(&self) -> usize {
        self.hist_visible + self.live.len()
    }

    fn get(&self, index: usize) -> Option<Sample> {
        if index < self.hist_visible {
            self.historic.get(index).cloned()
        } else {
            self.live.get(index - self.hist_visible).cloned()
        }
    }
}

/// Decorator extending a still-valid most recent sample to "now".
///
/// Reports one extra sample iff the underlying series is non-empty and its
/// last sample's quality is neither invalid nor disconnected. The extra
/// sample is a clone of the last raw sample re-stamped to `now` — unless
/// `now` has not yet caught up with the raw timestamp, in which case the
/// raw sample is returned unchanged.
pub struct ExtendedLiveSeries<'a, S: SeriesView + ?Sized> {
    inner: &'a S,
    now: DateTime<Utc>,
}

impl<'a, S: SeriesView + ?Sized> ExtendedLiveSeries<'a, S> {
    pub fn new(inner: &'a S, now: DateTime<Utc>) -> Self {
        Self { inner, now }
    }

    fn extension(&self) -> Option<Sample> {
        let last = self.inner.last()?;
        if !last.quality().is_valid() {
            return None;
        }
        if self.now <= last.time() {
            Some(last)
        } else {
            Some(last.at_time(self.now))
        }
    }
}

impl<S: SeriesView + ?Sized> SeriesView for ExtendedLiveSeries<'_, S> {
    fn len(&self) -> usize {
        let raw = self.inner.len();
        match self.inner.last() {
            Some(last) if last.quality().is_valid() => raw + 1,
            _ => raw,
        }
    }

    fn get(&self, index: usize) -> Option<Sample> {
        let raw = self.inner.len();
        if index < raw {
            self.inner.get(index)
        } else if index == raw {
            self.extension()
        } else {
            None
        }
    }
}

/// Read/write lock around one series instance.
///
/// Readers share the lock (recursion-safe, so a nested read from the same
/// thread cannot deadlock behind a waiting writer). A writer acquires it
/// exclusively, bounded by [`WRITE_LOCK_TIMEOUT`]: on timeout the
/// operation is abandoned, logged, and no mutation happens. Dropping the
/// write guard raises the "has new samples" flag that
/// `Model::update_and_check_new_samples` polls.
pub struct SeriesLock<S> {
    lock: RwLock<S>,
    new_samples: AtomicBool,
    write_timeout: Duration,
}

impl<S> SeriesLock<S> {
    pub fn new(inner: S) -> Self {
        Self::with_timeout(inner, WRITE_LOCK_TIMEOUT)
    }

    /// Lock with a custom write acquisition bound.
    pub fn with_timeout(inner: S, write_timeout: Duration) -> Self {
        Self {
            lock: RwLock::new(inner),
            new_samples: AtomicBool::new(false),
            write_timeout,
        }
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.lock.read_recursive()
    }

    /// Exclusive write access, bounded. `None` means the operation must be
    /// treated as aborted; nothing was modified.
    pub fn write(&self) -> Option<SeriesWriteGuard<'_, S>> {
        match self.lock.try_write_for(self.write_timeout) {
            Some(guard) => Some(SeriesWriteGuard {
                guard,
                flag: &self.new_samples,
            }),
            None => {
                log::warn!(
                    "series write lock not acquired within {:?}; operation aborted",
                    self.write_timeout
                );
                None
            }
        }
    }

    /// Peek the "has new samples" flag without clearing it.
    pub fn has_new_samples(&self) -> bool {
        self.new_samples.load(Ordering::Acquire)
    }

    /// Check and clear the "has new samples" flag.
    pub fn take_new_samples(&self) -> bool {
        self.new_samples.swap(false, Ordering::AcqRel)
    }
}

/// Write guard; sets the owning lock's new-samples flag when dropped.
pub struct SeriesWriteGuard<'a, S> {
    guard: RwLockWriteGuard<'a, S>,
    flag: &'a AtomicBool,
}

impl<S> std::ops::Deref for SeriesWriteGuard<'_, S> {
    type Target = S;
    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> std::ops::DerefMut for SeriesWriteGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

impl<S> Drop for SeriesWriteGuard<'_, S> {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// Read-side handle formula inputs use to observe another item's series.
pub trait SeriesSource: Send + Sync {
    /// Clone the raw samples out under the read lock (no "now" extension).
    fn snapshot(&self) -> Vec<Sample>;

    /// Peek whether the series received samples since the flag was last
    /// cleared. Never clears: the model owns clearing live channels' flags.
    fn has_new_samples(&self) -> bool;
}

impl<S: SeriesView + Send + Sync> SeriesSource for SeriesLock<S> {
    fn snapshot(&self) -> Vec<Sample> {
        self.read().to_vec()
    }

    fn has_new_samples(&self) -> bool {
        SeriesLock::has_new_samples(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Quality;
    use chrono::TimeZone;

    fn s(t: i64, v: f64) -> Sample {
        Sample::new("test", Utc.timestamp_opt(t, 0).unwrap(), v, Quality::Ok)
    }

    #[test]
    fn ring_drops_oldest_at_capacity() {
        let mut series = ChannelSeries::new(3);
        for i in 0..5 {
            series.append_live(s(i, i as f64));
        }
        assert_eq!(series.len(), 3);
        let times: Vec<i64> = series.to_vec().iter().map(|x| x.time().timestamp()).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn set_capacity_keeps_newest() {
        let mut series = ChannelSeries::new(5);
        for i in 0..5 {
            series.append_live(s(i, i as f64));
        }
        series.set_capacity(2);
        let times: Vec<i64> = series.to_vec().iter().map(|x| x.time().timestamp()).collect();
        assert_eq!(times, vec![3, 4]);
    }

    #[test]
    fn border_hides_historic_overlap() {
        let mut series = ChannelSeries::new(10);
        series.append_live(s(100, 1.0));
        series.append_live(s(110, 2.0));
        // Archive data reaching into the live range: only the part strictly
        // before the first live sample shows.
        series.merge_historic(&[s(50, 9.0), s(100, 8.0), s(105, 7.0)]);
        let times: Vec<i64> = series.to_vec().iter().map(|x| x.time().timestamp()).collect();
        assert_eq!(times, vec![50, 100, 110]);
        assert_eq!(series.get(1).unwrap().value(), 1.0, "live sample wins at the border");
        assert!(series.to_vec().windows(2).all(|w| w[0].time() <= w[1].time()));
    }

    #[test]
    fn refresh_needed_only_after_wrap() {
        let range = TimeRange::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(1000, 0).unwrap(),
        )
        .unwrap();
        let mut series = ChannelSeries::new(2);
        series.append_live(s(500, 1.0));
        assert!(!series.history_refresh_needed(range), "ring not full yet");
        series.append_live(s(510, 2.0));
        series.append_live(s(520, 3.0));
        assert!(series.history_refresh_needed(range), "wrapped and range start uncovered");
        // Historic data covering the range start satisfies the policy.
        series.merge_historic(&[s(0, 0.0)]);
        assert!(!series.history_refresh_needed(range));
    }

    #[test]
    fn extension_reports_synthetic_now_sample() {
        let mut inner = PlainSeries::new();
        inner.set(vec![s(100, 1.0)]);
        let now = Utc.timestamp_opt(200, 0).unwrap();
        let ext = ExtendedLiveSeries::new(&inner, now);
        assert_eq!(ext.len(), 2);
        let synth = ext.get(1).unwrap();
        assert_eq!(synth.time(), now);
        assert_eq!(synth.value(), 1.0);
        assert!(ext.get(2).is_none());
    }

    #[test]
    fn extension_skips_invalid_last_sample() {
        let mut inner = PlainSeries::new();
        inner.set(vec![Sample::disconnected("test", Utc.timestamp_opt(100, 0).unwrap())]);
        let ext = ExtendedLiveSeries::new(&inner, Utc.timestamp_opt(200, 0).unwrap());
        assert_eq!(ext.len(), 1);
        assert!(ext.get(1).is_none());
    }

    #[test]
    fn extension_does_not_move_sample_backwards() {
        let mut inner = PlainSeries::new();
        inner.set(vec![s(300, 1.0)]);
        // "now" before the last raw timestamp: raw sample returned as is.
        let ext = ExtendedLiveSeries::new(&inner, Utc.timestamp_opt(200, 0).unwrap());
        assert_eq!(ext.len(), 2);
        assert_eq!(ext.get(1).unwrap().time().timestamp(), 300);
    }

    #[test]
    fn write_guard_sets_new_samples_flag() {
        let lock = SeriesLock::new(PlainSeries::new());
        assert!(!lock.take_new_samples());
        {
            let mut guard = lock.write().unwrap();
            guard.set(vec![s(0, 1.0)]);
        }
        assert!(lock.has_new_samples(), "peek leaves flag set");
        assert!(lock.take_new_samples());
        assert!(!lock.take_new_samples(), "flag cleared by take");
    }

    #[test]
    fn timed_out_write_leaves_series_unmodified() {
        use std::sync::{mpsc, Arc};

        let lock = Arc::new(SeriesLock::with_timeout(
            PlainSeries::new(),
            Duration::from_millis(50),
        ));
        if let Some(mut guard) = lock.write() {
            guard.set(vec![s(0, 1.0)]);
        }
        lock.take_new_samples();

        // Hold a read guard on another thread for longer than the write
        // timeout.
        let reader = Arc::clone(&lock);
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let guard = reader.read();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            drop(guard);
        });
        held_rx.recv().unwrap();

        assert!(lock.write().is_none(), "write must give up after the timeout");
        assert!(!lock.has_new_samples(), "aborted write reports no news");

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        let guard = lock.read();
        assert_eq!(guard.len(), 1, "series untouched by the aborted write");
        assert_eq!(guard.get(0).unwrap().value(), 1.0);
    }

    #[test]
    fn concurrent_readers_share_the_lock() {
        use std::sync::Arc;

        let lock = Arc::new(SeriesLock::new(PlainSeries::new()));
        if let Some(mut guard) = lock.write() {
            guard.set(vec![s(0, 1.0), s(10, 2.0)]);
        }

        // A second reader must proceed while the first guard is held.
        let first = lock.read();
        let reader = Arc::clone(&lock);
        let second = std::thread::spawn(move || reader.read().len());
        assert_eq!(second.join().unwrap(), 2);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn empty_series_has_no_extension() {
        let inner = PlainSeries::new();
        let ext = ExtendedLiveSeries::new(&inner, Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(ext.len(), 0);
        assert!(ext.first().is_none());
    }
}
