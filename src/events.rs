//! Model change notifications.
//!
//! Anything mutating the model reports what changed through an
//! [`EventController`]; observers subscribe with an [`EventFilter`] and
//! receive [`ModelEvent`]s over an mpsc channel. Subscribers whose receiver
//! was dropped are pruned on the next emit.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Stable identity of one model item, independent of its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

/// Bit set of model change categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKind(u64);

impl EventKind {
    pub const NONE: EventKind = EventKind(0);
    /// Item added to the model.
    pub const ITEM_ADDED: EventKind = EventKind(1 << 0);
    /// Item removed from the model.
    pub const ITEM_REMOVED: EventKind = EventKind(1 << 1);
    /// Item shown or hidden.
    pub const ITEM_VISIBILITY: EventKind = EventKind(1 << 2);
    /// Cosmetic item change (name, axis assignment, display hints).
    pub const ITEM_LOOK: EventKind = EventKind(1 << 3);
    /// Item's engineering units changed.
    pub const ITEM_UNITS: EventKind = EventKind(1 << 4);
    /// Data-affecting item config changed (scan period, buffer size,
    /// archive sources, formula expression).
    pub const DATA_CONFIG: EventKind = EventKind(1 << 5);
    /// Buffered data no longer covers the time range; a history re-fetch
    /// is wanted.
    pub const REFRESH_REQUESTED: EventKind = EventKind(1 << 6);
    pub const AXIS_ADDED: EventKind = EventKind(1 << 7);
    pub const AXIS_REMOVED: EventKind = EventKind(1 << 8);
    pub const AXIS_CHANGED: EventKind = EventKind(1 << 9);
    pub const ANNOTATIONS: EventKind = EventKind(1 << 10);
    /// Model time range changed.
    pub const TIME_RANGE: EventKind = EventKind(1 << 11);

    pub const ALL: EventKind = EventKind(u64::MAX);

    /// Check whether `self` contains all bits in `other`.
    pub const fn contains(self, other: EventKind) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check whether `self` intersects with `other` (at least one bit in
    /// common).
    pub const fn intersects(self, other: EventKind) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EventKind {
    type Output = EventKind;
    fn bitor(self, rhs: EventKind) -> EventKind {
        EventKind(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EventKind {
    fn bitor_assign(&mut self, rhs: EventKind) {
        self.0 |= rhs.0;
    }
}

/// One change notification.
#[derive(Debug, Clone)]
pub struct ModelEvent {
    pub kinds: EventKind,
    pub timestamp: DateTime<Utc>,
    /// The item concerned, if the change is item-scoped.
    pub item: Option<ItemId>,
    pub item_name: Option<String>,
    /// For [`EventKind::DATA_CONFIG`]: whether previously fetched archive
    /// data became invalid (`true`) or the change was cosmetic (`false`).
    pub archive_invalid: Option<bool>,
    /// For axis events: index of the axis concerned.
    pub axis: Option<usize>,
}

impl ModelEvent {
    pub fn new(kinds: EventKind) -> Self {
        Self {
            kinds,
            timestamp: Utc::now(),
            item: None,
            item_name: None,
            archive_invalid: None,
            axis: None,
        }
    }

    pub fn for_item(kinds: EventKind, id: ItemId, name: impl Into<String>) -> Self {
        let mut ev = Self::new(kinds);
        ev.item = Some(id);
        ev.item_name = Some(name.into());
        ev
    }

    pub fn with_archive_invalid(mut self, invalid: bool) -> Self {
        self.archive_invalid = Some(invalid);
        self
    }

    pub fn for_axis(kinds: EventKind, axis: usize) -> Self {
        let mut ev = Self::new(kinds);
        ev.axis = Some(axis);
        ev
    }
}

/// Which event kinds a subscriber wants to see.
#[derive(Debug, Clone, Copy)]
pub struct EventFilter {
    mask: EventKind,
}

impl EventFilter {
    pub fn all() -> Self {
        Self {
            mask: EventKind::ALL,
        }
    }

    pub fn only(mask: EventKind) -> Self {
        Self { mask }
    }

    pub fn matches(&self, kinds: EventKind) -> bool {
        self.mask.intersects(kinds)
    }
}

#[derive(Default)]
struct Subscribers {
    list: Vec<(EventFilter, Sender<ModelEvent>)>,
}

/// Fan-out hub for model events. Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct EventController {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; events matching `filter` arrive on the
    /// returned receiver until it is dropped.
    pub fn subscribe(&self, filter: EventFilter) -> Receiver<ModelEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().list.push((filter, tx));
        rx
    }

    /// Deliver `event` to all matching subscribers, dropping any whose
    /// receiver has gone away.
    pub fn emit(&self, event: ModelEvent) {
        let mut subs = self.subscribers.lock();
        subs.list.retain(|(filter, tx)| {
            if filter.matches(event.kinds) {
                tx.send(event.clone()).is_ok()
            } else {
                true
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().list.len()
    }
}
