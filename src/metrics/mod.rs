//! Timing aggregation wired through every engine component.
//!
//! Two implementations behind the [`Metrics`] trait object: a no-op
//! (zero cost) and a recording collector that accumulates per-operation
//! counts, sum/min/max/avg durations, and a raw event log.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// The category an operation is recorded under, e.g. `(Statement, "If")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Statement,
    Node,
    Opcode,
    WorkflowCall,
    Expression,
    Execution,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Statement => "statement",
            Kind::Node => "node",
            Kind::Opcode => "opcode",
            Kind::WorkflowCall => "workflow_call",
            Kind::Expression => "expression",
            Kind::Execution => "execution",
        }
    }
}

/// Shared behavior both implementations expose.
pub trait Metrics: Send + Sync {
    fn record(&self, kind: Kind, name: &str, duration: Duration, metadata: Option<serde_json::Value>);
    fn start_execution(&self);
    fn end_execution(&self);
    fn snapshot(&self) -> Snapshot;
    fn events(&self) -> Vec<Event>;
}

/// Zero-cost no-op collector.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record(&self, _kind: Kind, _name: &str, _duration: Duration, _metadata: Option<serde_json::Value>) {}
    fn start_execution(&self) {}
    fn end_execution(&self) {}
    fn snapshot(&self) -> Snapshot {
        Snapshot::default()
    }
    fn events(&self) -> Vec<Event> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: String,
    pub name: String,
    pub duration_us: u128,
    pub timestamp_us: u128,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stat {
    pub count: u64,
    pub total_us: u128,
    pub min_us: u128,
    pub max_us: u128,
}

impl Stat {
    fn record(&mut self, duration: Duration) {
        let us = duration.as_micros();
        self.count += 1;
        self.total_us += us;
        self.min_us = if self.count == 1 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
    }

    pub fn avg_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_us as f64 / self.count as f64
        }
    }
}

/// Aggregated snapshot: `{kind: {name: Stat}}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub by_kind: HashMap<String, HashMap<String, Stat>>,
}

/// Recording collector: accumulates aggregate stats and a raw event log.
pub struct RecordingMetrics {
    stats: Mutex<HashMap<String, HashMap<String, Stat>>>,
    log: Mutex<Vec<Event>>,
    started_at: Mutex<Option<Instant>>,
    epoch: Instant,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            epoch: Instant::now(),
        }
    }

    /// Top-N operation names by total duration within a kind.
    pub fn top_n(&self, kind: Kind, n: usize) -> Vec<(String, Stat)> {
        let stats = self.stats.lock();
        let mut entries: Vec<(String, Stat)> = stats
            .get(kind.as_str())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.1.total_us.cmp(&a.1.total_us));
        entries.truncate(n);
        entries
    }

    /// Human-readable summary report.
    pub fn text_report(&self) -> String {
        let stats = self.stats.lock();
        let mut out = String::new();
        for (kind, by_name) in stats.iter() {
            out.push_str(&format!("== {kind} ==\n"));
            for (name, stat) in by_name {
                out.push_str(&format!(
                    "  {name}: count={} total_us={} avg_us={:.1} min_us={} max_us={}\n",
                    stat.count,
                    stat.total_us,
                    stat.avg_us(),
                    stat.min_us,
                    stat.max_us
                ));
            }
        }
        out
    }

    pub fn json_report(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for RecordingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics for RecordingMetrics {
    fn record(&self, kind: Kind, name: &str, duration: Duration, metadata: Option<serde_json::Value>) {
        self.stats
            .lock()
            .entry(kind.as_str().to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .record(duration);

        self.log.lock().push(Event {
            kind: kind.as_str().to_string(),
            name: name.to_string(),
            duration_us: duration.as_micros(),
            timestamp_us: self.epoch.elapsed().as_micros(),
            metadata,
        });
    }

    fn start_execution(&self) {
        *self.started_at.lock() = Some(Instant::now());
    }

    fn end_execution(&self) {
        if let Some(start) = self.started_at.lock().take() {
            self.record(Kind::Execution, "run", start.elapsed(), None);
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            by_kind: self.stats.lock().clone(),
        }
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }
}

/// RAII helper: records a `(kind, name)` duration when dropped. Used by
/// the executor/evaluator as `let _g = measure(metrics, Kind::Statement, "If");`.
pub struct Measure<'a> {
    metrics: &'a dyn Metrics,
    kind: Kind,
    name: String,
    metadata: Option<serde_json::Value>,
    start: Instant,
}

impl<'a> Measure<'a> {
    pub fn new(metrics: &'a dyn Metrics, kind: Kind, name: impl Into<String>) -> Self {
        Self {
            metrics,
            kind,
            name: name.into(),
            metadata: None,
            start: Instant::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl Drop for Measure<'_> {
    fn drop(&mut self) {
        self.metrics
            .record(self.kind, &self.name, self.start.elapsed(), self.metadata.take());
    }
}
