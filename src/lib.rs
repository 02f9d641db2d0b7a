//! Time-series sample model for trending control-system channels.
//!
//! A [`Model`] holds an ordered set of items: live [`Channel`]s fed by a
//! [`LiveSource`] with archive history spliced underneath, and
//! [`FormulaChannel`]s deriving series from other items. Every item's
//! samples sit behind a [`SeriesLock`], so source callbacks, the scan
//! scheduler and readers coexist without a dedicated model thread.
//!
//! Typical flow: build a model over a source, add items, `start()` it,
//! then poll [`Model::update_and_check_new_samples`] at the display rate
//! and redraw when it reports news.

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod formula;
pub mod merge;
pub mod model;
pub mod sample;
pub mod scan;
pub mod series;
pub mod source;

pub use channel::Channel;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FormulaError, ModelError};
pub use events::{EventController, EventFilter, EventKind, ItemId, ModelEvent};
pub use formula::{CompiledFormula, ExprEvaluator, FormulaChannel, FormulaEvaluator, FormulaInput};
pub use merge::merge;
pub use model::{AnnotationInfo, AxisConfig, Model, ModelItem};
pub use sample::{archive_source, Quality, Sample, SampleStats, TimeRange, SOURCE_FORMULA, SOURCE_LIVE};
pub use scan::{ScanScheduler, ScanTask};
pub use series::{
    ChannelSeries, ExtendedLiveSeries, PlainSeries, SeriesLock, SeriesSource, SeriesView,
    SeriesWriteGuard,
};
pub use source::{ArchiveDataSource, DecodedValue, LiveEvent, LiveSource, Subscription};
