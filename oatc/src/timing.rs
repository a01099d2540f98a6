//! Phase timings.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Wall-clock splits of one run.
#[derive(Debug)]
pub struct TimingLogger {
    name: String,
    splits: Vec<(String, Duration)>,
    current: Option<(String, Instant)>,
}

impl TimingLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            splits: Vec::new(),
            current: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the open split, if any, and open a new one.
    pub fn start_split(&mut self, label: impl Into<String>) {
        self.end_split();
        self.current = Some((label.into(), Instant::now()));
    }

    pub fn end_split(&mut self) {
        if let Some((label, start)) = self.current.take() {
            self.splits.push((label, start.elapsed()));
        }
    }

    /// Time `f` as its own split.
    pub fn split<T>(&mut self, label: impl Into<String>, f: impl FnOnce() -> T) -> T {
        self.start_split(label);
        let value = f();
        self.end_split();
        value
    }

    /// Closed splits in the order they were taken.
    pub fn splits(&self) -> &[(String, Duration)] {
        &self.splits
    }

    pub fn total(&self) -> Duration {
        self.splits.iter().map(|(_, d)| *d).sum()
    }

    pub fn dump(&self) {
        for (label, duration) in &self.splits {
            info!(logger = %self.name, split = %label, ?duration, "timing");
        }
        info!(logger = %self.name, total = ?self.total(), "timing total");
    }
}

/// Totals per split label across many runs.
#[derive(Debug, Default)]
pub struct CumulativeLogger {
    name: String,
    totals: Mutex<BTreeMap<String, (Duration, u32)>>,
    iterations: Mutex<u32>,
}

impl CumulativeLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_logger(&self, logger: &TimingLogger) {
        let mut totals = self.totals.lock();
        for (label, duration) in logger.splits() {
            let entry = totals.entry(label.clone()).or_default();
            entry.0 += *duration;
            entry.1 += 1;
        }
        *self.iterations.lock() += 1;
    }

    pub fn iterations(&self) -> u32 {
        *self.iterations.lock()
    }

    /// `(label, total duration, times seen)` sorted by label.
    pub fn totals(&self) -> Vec<(String, Duration, u32)> {
        self.totals
            .lock()
            .iter()
            .map(|(label, (d, n))| (label.clone(), *d, *n))
            .collect()
    }

    pub fn dump(&self) {
        for (label, total, count) in self.totals() {
            info!(logger = %self.name, split = %label, ?total, count, "cumulative timing");
        }
    }
}
