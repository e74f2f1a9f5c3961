//! nori-observe: vendor-neutral observability ABI.
//!
//! Storage crates depend only on these traits and event types. Backends live elsewhere;
//! this crate ships a [`NoopMeter`] and an in-memory [`RecordingMeter`] for tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type Labels = &'static [(&'static str, &'static str)];

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(&self, name: &'static str, labels: Labels) -> Box<dyn Counter>;
    fn gauge(&self, name: &'static str, labels: Labels) -> Box<dyn Gauge>;
    fn histo(&self, name: &'static str, labels: Labels) -> Box<dyn Histogram>;
    fn emit(&self, evt: VizEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct Noop;
impl Counter for Noop {
    fn inc(&self, _v: u64) {}
}
impl Gauge for Noop {
    fn set(&self, _v: i64) {}
}
impl Histogram for Noop {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(&self, _n: &'static str, _l: Labels) -> Box<dyn Counter> {
        Box::new(Noop)
    }
    fn gauge(&self, _n: &'static str, _l: Labels) -> Box<dyn Gauge> {
        Box::new(Noop)
    }
    fn histo(&self, _n: &'static str, _l: Labels) -> Box<dyn Histogram> {
        Box::new(Noop)
    }
    fn emit(&self, _e: VizEvent) {}
}

/// Typed events for live visualization (stored values never included).
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum VizEvent {
    Log(LogEvt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEvt {
    /// Display form of the backing file path.
    pub file: String,
    pub kind: LogKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogKind {
    /// Registry entry created for a path.
    Opened { records: usize },
    /// Last handle closed, entry torn down.
    Closed,
    /// Backing file re-read after a modification-time change.
    Reconciled { records: usize },
    /// Pending records durably appended.
    Flushed { records: usize, ms: u32 },
    /// Sequence cleared and backing file removed.
    Cleared,
    /// Change watch reported a failure.
    WatchError,
}

/// In-memory meter that keeps every sample, for assertions in tests.
#[derive(Clone, Default)]
pub struct RecordingMeter {
    inner: Arc<Recorded>,
}

#[derive(Default)]
struct Recorded {
    counters: Mutex<HashMap<&'static str, u64>>,
    gauges: Mutex<HashMap<&'static str, i64>>,
    histos: Mutex<HashMap<&'static str, Vec<f64>>>,
    events: Mutex<Vec<VizEvent>>,
}

struct RecordedSample {
    name: &'static str,
    inner: Arc<Recorded>,
}

impl Counter for RecordedSample {
    fn inc(&self, v: u64) {
        *self.inner.counters.lock().entry(self.name).or_default() += v;
    }
}
impl Gauge for RecordedSample {
    fn set(&self, v: i64) {
        self.inner.gauges.lock().insert(self.name, v);
    }
}
impl Histogram for RecordedSample {
    fn observe(&self, v: f64) {
        self.inner.histos.lock().entry(self.name).or_default().push(v);
    }
}

impl RecordingMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all increments seen by the named counter.
    pub fn counter_value(&self, name: &str) -> u64 {
        self.inner.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Last value set on the named gauge.
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.inner.gauges.lock().get(name).copied()
    }

    pub fn histo_samples(&self, name: &str) -> Vec<f64> {
        self.inner.histos.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn events(&self) -> Vec<VizEvent> {
        self.inner.events.lock().clone()
    }

    fn sample(&self, name: &'static str) -> Box<RecordedSample> {
        Box::new(RecordedSample {
            name,
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Meter for RecordingMeter {
    fn counter(&self, name: &'static str, _l: Labels) -> Box<dyn Counter> {
        self.sample(name)
    }
    fn gauge(&self, name: &'static str, _l: Labels) -> Box<dyn Gauge> {
        self.sample(name)
    }
    fn histo(&self, name: &'static str, _l: Labels) -> Box<dyn Histogram> {
        self.sample(name)
    }
    fn emit(&self, evt: VizEvent) {
        self.inner.events.lock().push(evt);
    }
}

#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}
#[macro_export]
macro_rules! obs_timed {
    ($m:expr, $name:expr, $labels:expr, $body:block) => {{
        let __t = std::time::Instant::now();
        let __ret = { $body };
        let __ms = __t.elapsed().as_secs_f64() * 1000.0;
        $m.histo($name, $labels).observe(__ms);
        __ret
    }};
}
