//! The trend model: an ordered collection of channel and formula items,
//! value axes and annotations, with lifecycle control and change events.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::clock::{Clock, SystemClock};
use crate::config::MIN_UPDATE_PERIOD;
use crate::error::ModelError;
use crate::events::{EventController, EventKind, ItemId, ModelEvent};
use crate::formula::{ExprEvaluator, FormulaChannel, FormulaEvaluator, FormulaInput};
use crate::sample::TimeRange;
use crate::scan::ScanScheduler;
use crate::series::SeriesSource;
use crate::source::LiveSource;

/// Configuration of one value axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub autoscale: bool,
    pub log_scale: bool,
    pub visible: bool,
}

impl AxisConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min: 0.0,
            max: 10.0,
            autoscale: true,
            log_scale: false,
            visible: true,
        }
    }
}

/// Marker placed on the plot, anchored to one item's sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationInfo {
    pub item: ItemId,
    pub time: chrono::DateTime<chrono::Utc>,
    pub value: f64,
    pub text: String,
}

/// One item held by the model.
pub enum ModelItem {
    Pv(Channel),
    Formula(FormulaChannel),
}

impl ModelItem {
    pub fn id(&self) -> ItemId {
        match self {
            ModelItem::Pv(c) => c.id(),
            ModelItem::Formula(f) => f.id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            ModelItem::Pv(c) => c.name(),
            ModelItem::Formula(f) => f.name(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            ModelItem::Pv(c) => c.display_name(),
            ModelItem::Formula(f) => f.display_name(),
        }
    }

    pub fn series_source(&self) -> Arc<dyn SeriesSource> {
        match self {
            ModelItem::Pv(c) => c.series_source(),
            ModelItem::Formula(f) => f.series_source(),
        }
    }

    pub fn as_pv(&self) -> Option<&Channel> {
        match self {
            ModelItem::Pv(c) => Some(c),
            ModelItem::Formula(_) => None,
        }
    }

    pub fn as_formula(&self) -> Option<&FormulaChannel> {
        match self {
            ModelItem::Pv(_) => None,
            ModelItem::Formula(f) => Some(f),
        }
    }

    fn take_new_samples(&self) -> bool {
        match self {
            ModelItem::Pv(c) => c.samples().take_new_samples(),
            ModelItem::Formula(f) => f.samples().take_new_samples(),
        }
    }
}

struct Entry {
    item: ModelItem,
    visible: bool,
    axis: usize,
}

/// Container of all trended items.
///
/// The model itself is a single-owner structure; concurrency lives inside
/// the items (source callbacks and the scan scheduler write into their
/// series through [`crate::series::SeriesLock`]).
pub struct Model {
    items: Vec<Entry>,
    axes: Vec<AxisConfig>,
    annotations: Vec<AnnotationInfo>,
    events: EventController,
    source: Arc<dyn LiveSource>,
    scheduler: Arc<ScanScheduler>,
    clock: Arc<dyn Clock>,
    evaluator: Arc<dyn FormulaEvaluator>,
    time_range: TimeRange,
    update_period: f64,
    running: bool,
    next_id: u64,
}

impl Model {
    /// Model with the shared scan scheduler, wall clock and built-in
    /// formula compiler.
    pub fn new(source: Arc<dyn LiveSource>) -> Self {
        Self::with_parts(
            source,
            ScanScheduler::global(),
            Arc::new(SystemClock),
            Arc::new(ExprEvaluator),
        )
    }

    pub fn with_parts(
        source: Arc<dyn LiveSource>,
        scheduler: Arc<ScanScheduler>,
        clock: Arc<dyn Clock>,
        evaluator: Arc<dyn FormulaEvaluator>,
    ) -> Self {
        let now = clock.now();
        let time_range = TimeRange {
            start: now - Duration::hours(1),
            end: now,
        };
        Self {
            items: Vec::new(),
            axes: vec![AxisConfig::new("Value 1")],
            annotations: Vec::new(),
            events: EventController::new(),
            source,
            scheduler,
            clock,
            evaluator,
            time_range,
            update_period: 1.0,
            running: false,
            next_id: 0,
        }
    }

    pub fn events(&self) -> &EventController {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // ----- items -------------------------------------------------------

    /// Add a live channel item. The new item lands on axis 0 and, if the
    /// model is running, starts immediately.
    pub fn add_pv(
        &mut self,
        name: impl Into<String>,
        scan_period: f64,
    ) -> Result<ItemId, ModelError> {
        let name = name.into();
        self.check_name_free(&name)?;
        let id = self.next_id();
        let channel = Channel::new(
            id,
            name.clone(),
            scan_period,
            self.events.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.clock),
        );
        if self.running {
            channel.start()?;
        }
        self.push_item(ModelItem::Pv(channel), id, name);
        Ok(id)
    }

    /// Add a formula item. `inputs` binds variable names to existing
    /// items by display name.
    pub fn add_formula(
        &mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
        inputs: &[(&str, &str)],
    ) -> Result<ItemId, ModelError> {
        let name = name.into();
        self.check_name_free(&name)?;
        let mut bound = Vec::with_capacity(inputs.len());
        for (item_name, variable) in inputs {
            let item = self
                .item(item_name)
                .ok_or_else(|| ModelError::UnknownItem((*item_name).to_owned()))?;
            bound.push(FormulaInput::new(item.series_source(), *item_name, *variable));
        }
        let id = self.next_id();
        let formula = FormulaChannel::new(
            id,
            name.clone(),
            expression,
            bound,
            Arc::clone(&self.evaluator),
            self.events.clone(),
        )?;
        self.push_item(ModelItem::Formula(formula), id, name);
        Ok(id)
    }

    /// Remove an item by name. A running channel is stopped and its
    /// buffer dropped.
    pub fn remove_item(&mut self, name: &str) -> Result<(), ModelError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| ModelError::UnknownItem(name.to_owned()))?;
        let entry = self.items.remove(index);
        if let ModelItem::Pv(channel) = &entry.item {
            if channel.is_running() {
                channel.stop();
            }
            channel.clear_samples();
        }
        self.events.emit(ModelEvent::for_item(
            EventKind::ITEM_REMOVED,
            entry.item.id(),
            name,
        ));
        Ok(())
    }

    /// Move an item one position towards the front (`up`) or back of the
    /// display order. Already at the edge is a no-op.
    pub fn move_item(&mut self, name: &str, up: bool) -> Result<(), ModelError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| ModelError::UnknownItem(name.to_owned()))?;
        let target = if up {
            index.checked_sub(1)
        } else {
            (index + 1 < self.items.len()).then_some(index + 1)
        };
        let Some(target) = target else {
            return Ok(());
        };
        self.items.swap(index, target);
        let id = self.items[target].item.id();
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_LOOK, id, name));
        Ok(())
    }

    pub fn item(&self, name: &str) -> Option<&ModelItem> {
        self.items
            .iter()
            .find(|e| e.item.name() == name)
            .map(|e| &e.item)
    }

    pub fn items(&self) -> impl Iterator<Item = &ModelItem> {
        self.items.iter().map(|e| &e.item)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// First formula item using `item_name` as an input, if any. Callers
    /// removing items consult this to warn about dangling inputs.
    pub fn formula_with_input(&self, item_name: &str) -> Option<&FormulaChannel> {
        self.items.iter().find_map(|e| {
            e.item
                .as_formula()
                .filter(|f| f.uses_input(item_name))
        })
    }

    // ----- display attributes ------------------------------------------

    pub fn is_item_visible(&self, name: &str) -> Option<bool> {
        self.items
            .iter()
            .find(|e| e.item.name() == name)
            .map(|e| e.visible)
    }

    pub fn set_item_visible(&mut self, name: &str, visible: bool) -> Result<(), ModelError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| ModelError::UnknownItem(name.to_owned()))?;
        if self.items[index].visible == visible {
            return Ok(());
        }
        self.items[index].visible = visible;
        let id = self.items[index].item.id();
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_VISIBILITY, id, name));
        Ok(())
    }

    pub fn item_axis(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .find(|e| e.item.name() == name)
            .map(|e| e.axis)
    }

    pub fn set_item_axis(&mut self, name: &str, axis: usize) -> Result<(), ModelError> {
        if axis >= self.axes.len() {
            return Err(ModelError::UnknownAxis(axis));
        }
        let index = self
            .index_of(name)
            .ok_or_else(|| ModelError::UnknownItem(name.to_owned()))?;
        if self.items[index].axis == axis {
            return Ok(());
        }
        self.items[index].axis = axis;
        let id = self.items[index].item.id();
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_LOOK, id, name));
        Ok(())
    }

    // ----- axes --------------------------------------------------------

    pub fn axes(&self) -> &[AxisConfig] {
        &self.axes
    }

    pub fn add_axis(&mut self) -> usize {
        let index = self.axes.len();
        self.axes.push(AxisConfig::new(format!("Value {}", index + 1)));
        self.events
            .emit(ModelEvent::for_axis(EventKind::AXIS_ADDED, index));
        index
    }

    pub fn update_axis(&mut self, index: usize, config: AxisConfig) -> Result<(), ModelError> {
        let slot = self
            .axes
            .get_mut(index)
            .ok_or(ModelError::UnknownAxis(index))?;
        if *slot == config {
            return Ok(());
        }
        *slot = config;
        self.events
            .emit(ModelEvent::for_axis(EventKind::AXIS_CHANGED, index));
        Ok(())
    }

    /// Remove an axis; rejected while any item is assigned to it. Items
    /// on later axes shift down by one.
    pub fn remove_axis(&mut self, index: usize) -> Result<(), ModelError> {
        if index >= self.axes.len() {
            return Err(ModelError::UnknownAxis(index));
        }
        if self.items.iter().any(|e| e.axis == index) {
            return Err(ModelError::AxisInUse(index));
        }
        self.axes.remove(index);
        for entry in &mut self.items {
            if entry.axis > index {
                entry.axis -= 1;
            }
        }
        self.events
            .emit(ModelEvent::for_axis(EventKind::AXIS_REMOVED, index));
        Ok(())
    }

    // ----- annotations and time range ----------------------------------

    pub fn annotations(&self) -> &[AnnotationInfo] {
        &self.annotations
    }

    pub fn set_annotations(&mut self, annotations: Vec<AnnotationInfo>) {
        self.annotations = annotations;
        self.events.emit(ModelEvent::new(EventKind::ANNOTATIONS));
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn set_time_range(&mut self, range: TimeRange) {
        if self.time_range == range {
            return;
        }
        self.time_range = range;
        self.events.emit(ModelEvent::new(EventKind::TIME_RANGE));
    }

    pub fn update_period(&self) -> f64 {
        self.update_period
    }

    /// Seconds between display refreshes, clamped to the minimum.
    pub fn set_update_period(&mut self, period: f64) {
        self.update_period = period.max(MIN_UPDATE_PERIOD);
    }

    // ----- lifecycle ---------------------------------------------------

    /// Start all channel items. Items added later start automatically.
    pub fn start(&mut self) -> Result<(), ModelError> {
        if self.running {
            return Err(ModelError::AlreadyStarted("model".into()));
        }
        for entry in &self.items {
            if let ModelItem::Pv(channel) = &entry.item {
                if !channel.is_running() {
                    channel.start()?;
                }
            }
        }
        self.running = true;
        Ok(())
    }

    /// Stop all channel items. Stopping a model that is not running is
    /// logged and otherwise ignored.
    pub fn stop(&mut self) {
        if !self.running {
            log::warn!("model stopped while not running");
            return;
        }
        for entry in &self.items {
            if let ModelItem::Pv(channel) = &entry.item {
                if channel.is_running() {
                    channel.stop();
                }
            }
        }
        self.running = false;
    }

    /// Remove all items and annotations.
    pub fn clear(&mut self) {
        for entry in self.items.drain(..) {
            if let ModelItem::Pv(channel) = &entry.item {
                if channel.is_running() {
                    channel.stop();
                }
            }
            self.events.emit(ModelEvent::for_item(
                EventKind::ITEM_REMOVED,
                entry.item.id(),
                entry.item.name(),
            ));
        }
        self.annotations.clear();
    }

    /// Stop and drop everything.
    pub fn dispose(&mut self) {
        if self.running {
            self.stop();
        }
        self.clear();
    }

    /// Periodic update tick: reevaluate formulas over their inputs'
    /// latest samples, then report whether any item received new samples
    /// since the previous tick.
    ///
    /// Formulas run before the flags are cleared so they observe which of
    /// their inputs changed.
    pub fn update_and_check_new_samples(&mut self) -> bool {
        for entry in &self.items {
            if let ModelItem::Formula(formula) = &entry.item {
                formula.reevaluate();
            }
        }
        let mut any = false;
        for entry in &self.items {
            any |= entry.item.take_new_samples();
        }
        any
    }

    // ----- internals ---------------------------------------------------

    fn next_id(&mut self) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        id
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|e| e.item.name() == name)
    }

    fn check_name_free(&self, name: &str) -> Result<(), ModelError> {
        if self.index_of(name).is_some() {
            return Err(ModelError::DuplicateItem(name.to_owned()));
        }
        Ok(())
    }

    fn push_item(&mut self, item: ModelItem, id: ItemId, name: String) {
        self.items.push(Entry {
            item,
            visible: true,
            axis: 0,
        });
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_ADDED, id, name));
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        if self.running {
            self.stop();
        }
    }
}
