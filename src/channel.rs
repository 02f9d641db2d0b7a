//! Live channel item: subscribes to a [`LiveSource`], buffers updates in a
//! bounded ring and splices archive history underneath.
//!
//! Two acquisition modes, selected by the scan period:
//! - monitor (period 0): every source update becomes a sample,
//! - scanned (period > 0): updates only refresh a cached value, which a
//!   shared scheduler samples periodically, re-stamped to the sampling
//!   time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{LIVE_BUFFER_CAPACITY, MIN_SCAN_PERIOD};
use crate::error::ModelError;
use crate::events::{EventController, EventKind, ItemId, ModelEvent};
use crate::sample::{Quality, Sample, TimeRange, SOURCE_LIVE};
use crate::scan::{ScanScheduler, ScanTask};
use crate::series::{ChannelSeries, SeriesLock, SeriesSource, SeriesView};
use crate::source::{ArchiveDataSource, DecodedValue, LiveEvent, LiveSource, Subscription};

fn live_sample(v: DecodedValue) -> Sample {
    let sample = Sample::new(SOURCE_LIVE, v.time, v.value, v.quality);
    match v.info {
        Some(info) => sample.with_info(info),
        None => sample,
    }
}

/// State shared between the channel and its source/scan callbacks.
struct ChannelCore {
    id: ItemId,
    name: Mutex<String>,
    events: EventController,
    clock: Arc<dyn Clock>,
    series: Arc<SeriesLock<ChannelSeries>>,
    /// Seconds between scans; 0 selects monitor mode.
    scan_period: Mutex<f64>,
    /// Most recent source value, consumed by scanned mode.
    current: Mutex<Option<DecodedValue>>,
    units: Mutex<Option<String>>,
}

impl ChannelCore {
    fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn on_event(&self, event: LiveEvent) {
        match event {
            LiveEvent::Value(value) => {
                self.adopt_units(&value);
                let scanned = *self.scan_period.lock() > 0.0;
                *self.current.lock() = Some(value.clone());
                if !scanned {
                    self.append(live_sample(value));
                }
            }
            LiveEvent::Disconnected { time } => {
                log::debug!("channel '{}' disconnected", self.name());
                *self.current.lock() = None;
                self.append_disconnect(time);
            }
        }
    }

    /// Scanned mode tick: log the cached value re-stamped to now.
    fn do_scan(&self) {
        let current = self.current.lock().clone();
        if let Some(value) = current {
            let now = self.clock.now();
            self.append(live_sample(value).at_time(now));
        }
    }

    fn append(&self, sample: Sample) {
        if let Some(mut guard) = self.series.write() {
            guard.append_live(sample);
        }
    }

    /// Buffer a disconnect marker, unless the series already ends in one.
    fn append_disconnect(&self, time: chrono::DateTime<chrono::Utc>) {
        {
            let guard = self.series.read();
            if guard.last().map(|s| s.quality()) == Some(Quality::Disconnected) {
                return;
            }
        }
        self.append(Sample::disconnected(SOURCE_LIVE, time));
    }

    fn adopt_units(&self, value: &DecodedValue) {
        let Some(unit) = value.unit.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };
        let mut units = self.units.lock();
        if units.as_deref() == Some(unit) {
            return;
        }
        *units = Some(unit.to_owned());
        drop(units);
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_UNITS, self.id, self.name()));
    }
}

/// Model item backed by one live channel.
pub struct Channel {
    core: Arc<ChannelCore>,
    source: Arc<dyn LiveSource>,
    scheduler: Arc<ScanScheduler>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    scan_task: Mutex<Option<ScanTask>>,
    archives: Mutex<Vec<ArchiveDataSource>>,
    /// Label shown instead of the channel name, when set.
    display_name: Mutex<Option<String>>,
}

impl Channel {
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        scan_period: f64,
        events: EventController,
        source: Arc<dyn LiveSource>,
        scheduler: Arc<ScanScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(ChannelCore {
                id,
                name: Mutex::new(name.into()),
                events,
                clock,
                series: Arc::new(SeriesLock::new(ChannelSeries::new(LIVE_BUFFER_CAPACITY))),
                scan_period: Mutex::new(clamp_scan_period(scan_period)),
                current: Mutex::new(None),
                units: Mutex::new(None),
            }),
            source,
            scheduler,
            subscription: Mutex::new(None),
            scan_task: Mutex::new(None),
            archives: Mutex::new(Vec::new()),
            display_name: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ItemId {
        self.core.id
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    /// Label for display purposes; falls back to the channel name.
    pub fn display_name(&self) -> String {
        self.display_name
            .lock()
            .clone()
            .unwrap_or_else(|| self.name())
    }

    pub fn set_display_name(&self, label: Option<String>) {
        {
            let mut current = self.display_name.lock();
            if *current == label {
                return;
            }
            *current = label;
        }
        self.core.events.emit(ModelEvent::for_item(
            EventKind::ITEM_LOOK,
            self.core.id,
            self.name(),
        ));
    }

    pub fn units(&self) -> Option<String> {
        self.core.units.lock().clone()
    }

    pub fn scan_period(&self) -> f64 {
        *self.core.scan_period.lock()
    }

    pub fn is_running(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn samples(&self) -> &SeriesLock<ChannelSeries> {
        &self.core.series
    }

    /// Read-side handle for formula inputs.
    pub fn series_source(&self) -> Arc<dyn SeriesSource> {
        Arc::clone(&self.core.series) as Arc<dyn SeriesSource>
    }

    /// Begin receiving updates, and in scanned mode arm the periodic scan.
    pub fn start(&self) -> Result<(), ModelError> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Err(ModelError::AlreadyStarted(self.name()));
        }
        let core = Arc::clone(&self.core);
        *subscription = Some(
            self.source
                .subscribe(&self.name(), Box::new(move |ev| core.on_event(ev))),
        );
        drop(subscription);
        self.arm_scan();
        Ok(())
    }

    /// Stop receiving updates. Stopping an already stopped channel is
    /// logged and otherwise ignored.
    pub fn stop(&self) {
        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            log::warn!("channel '{}' stopped while not running", self.name());
            return;
        }
        *subscription = None;
        drop(subscription);
        *self.scan_task.lock() = None;
        *self.core.current.lock() = None;
    }

    /// Rename the channel. A running channel is resubscribed under the new
    /// name with its buffer cleared, since the old samples belong to a
    /// different channel. Returns false if the name did not change.
    pub fn set_name(&self, name: impl Into<String>) -> Result<bool, ModelError> {
        let name = name.into();
        if self.name() == name {
            return Ok(false);
        }
        let was_running = self.is_running();
        if was_running {
            self.stop();
        }
        self.clear_samples();
        *self.core.name.lock() = name;
        if was_running {
            self.start()?;
        }
        self.core.events.emit(ModelEvent::for_item(
            EventKind::ITEM_LOOK,
            self.core.id,
            self.name(),
        ));
        Ok(true)
    }

    /// Change the scan period (seconds; 0 or below the minimum selects
    /// monitor mode). A running channel is rearmed immediately.
    pub fn set_scan_period(&self, period: f64) {
        let period = clamp_scan_period(period);
        {
            let mut current = self.core.scan_period.lock();
            if *current == period {
                return;
            }
            *current = period;
        }
        if self.is_running() {
            *self.scan_task.lock() = None;
            self.arm_scan();
        }
        self.fire_data_config(false);
    }

    pub fn live_capacity(&self) -> usize {
        self.core.series.read().capacity()
    }

    /// Resize the live ring buffer, keeping the newest samples.
    pub fn set_live_capacity(&self, capacity: usize) {
        if self.live_capacity() == capacity {
            return;
        }
        if let Some(mut guard) = self.core.series.write() {
            guard.set_capacity(capacity);
        } else {
            return;
        }
        self.fire_data_config(false);
    }

    /// Drop all buffered samples.
    pub fn clear_samples(&self) {
        if let Some(mut guard) = self.core.series.write() {
            guard.clear();
        }
    }

    /// Splice fetched archive samples into the historic block. Returns
    /// false if the write lock could not be acquired in time; nothing was
    /// merged in that case.
    ///
    /// When `range` is given and the buffered data no longer reaches back
    /// to its start, a refresh request is emitted.
    pub fn merge_archived(&self, samples: &[Sample], range: Option<TimeRange>) -> bool {
        let refresh = {
            let mut guard = match self.core.series.write() {
                Some(guard) => guard,
                None => return false,
            };
            guard.merge_historic(samples);
            range.is_some_and(|r| guard.history_refresh_needed(r))
        };
        if refresh {
            self.core.events.emit(ModelEvent::for_item(
                EventKind::REFRESH_REQUESTED,
                self.core.id,
                self.name(),
            ));
        }
        true
    }

    pub fn archives(&self) -> Vec<ArchiveDataSource> {
        self.archives.lock().clone()
    }

    /// Add an archive source; a source with the same URL must not already
    /// be configured.
    pub fn add_archive(&self, source: ArchiveDataSource) -> Result<(), ModelError> {
        {
            let mut archives = self.archives.lock();
            if archives.contains(&source) {
                return Err(ModelError::DuplicateArchive(source.url));
            }
            archives.push(source);
        }
        self.fire_data_config(true);
        Ok(())
    }

    /// Remove an archive source. Removing one that is not configured is a
    /// no-op and emits nothing. Already fetched data stays usable, so the
    /// change is reported as cosmetic.
    pub fn remove_archive(&self, source: &ArchiveDataSource) -> bool {
        {
            let mut archives = self.archives.lock();
            let before = archives.len();
            archives.retain(|a| a != source);
            if archives.len() == before {
                return false;
            }
        }
        self.fire_data_config(false);
        true
    }

    /// Replace the archive source list wholesale. Setting a list equal to
    /// the current one (count and order) emits nothing.
    pub fn set_archives(&self, sources: Vec<ArchiveDataSource>) {
        {
            let mut archives = self.archives.lock();
            if *archives == sources {
                return;
            }
            *archives = sources;
        }
        self.fire_data_config(true);
    }

    fn arm_scan(&self) {
        let period = self.scan_period();
        if period <= 0.0 {
            return;
        }
        let core = Arc::clone(&self.core);
        *self.scan_task.lock() = Some(
            self.scheduler
                .schedule(Duration::from_secs_f64(period), move || core.do_scan()),
        );
    }

    fn fire_data_config(&self, archive_invalid: bool) {
        self.core.events.emit(
            ModelEvent::for_item(EventKind::DATA_CONFIG, self.core.id, self.name())
                .with_archive_invalid(archive_invalid),
        );
    }
}

fn clamp_scan_period(period: f64) -> f64 {
    // Sub-minimum periods behave as monitor mode rather than hammering
    // the scheduler.
    if period < MIN_SCAN_PERIOD {
        0.0
    } else {
        period
    }
}
