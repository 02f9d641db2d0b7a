#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use pvtrend::{DecodedValue, LiveEvent, LiveSource, Quality, Sample, Subscription};

struct Listener {
    id: u64,
    channel: String,
    callback: Arc<dyn Fn(LiveEvent) + Send + Sync>,
}

/// Test double for a protocol client: events are pushed by the test and
/// delivered to the listeners subscribed under the matching channel name.
pub struct ScriptedSource {
    listeners: Arc<Mutex<Vec<Listener>>>,
    next_id: AtomicU64,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        init_logging();
        Arc::new(Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn push(&self, channel: &str, event: LiveEvent) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter().filter(|l| l.channel == channel) {
            (listener.callback)(event.clone());
        }
    }

    pub fn push_value(&self, channel: &str, t: i64, value: f64) {
        self.push(channel, value_event(t, value));
    }

    pub fn push_disconnect(&self, channel: &str, t: i64) {
        self.push(channel, LiveEvent::Disconnected { time: ts(t) });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl LiveSource for ScriptedSource {
    fn subscribe(
        &self,
        name: &str,
        listener: Box<dyn Fn(LiveEvent) + Send + Sync>,
    ) -> Box<dyn Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Listener {
            id,
            channel: name.to_owned(),
            callback: listener.into(),
        });
        Box::new(ScriptedSubscription {
            id,
            listeners: Arc::clone(&self.listeners),
        })
    }
}

struct ScriptedSubscription {
    id: u64,
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl Subscription for ScriptedSubscription {}

impl Drop for ScriptedSubscription {
    fn drop(&mut self) {
        self.listeners.lock().retain(|l| l.id != self.id);
    }
}

/// Capture the crate's log output in the test harness, once per binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn ts(t: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(t, 0).unwrap()
}

pub fn value_event(t: i64, value: f64) -> LiveEvent {
    LiveEvent::Value(DecodedValue {
        time: ts(t),
        value,
        quality: Quality::Ok,
        unit: None,
        info: None,
    })
}

pub fn sample(source: &str, t: i64, value: f64) -> Sample {
    Sample::new(source, ts(t), value, Quality::Ok)
}
