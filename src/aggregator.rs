//! Rolling-window aggregation of power readings
//!
//! The control loop records one reading per source and sampling tick and
//! averages the grid and wallbox windows at the evaluation cadence.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Role of a power source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// PV inverter, production >= 0
    Pv,
    /// Grid meter, signed: + import, - export
    Grid,
    /// Wallbox, consumption >= 0
    Wallbox,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pv => "pv",
            SourceKind::Grid => "grid",
            SourceKind::Wallbox => "wallbox",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sample from a power source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: Instant,
    pub watts: f64,
    pub source_kind: SourceKind,
}

impl Reading {
    pub fn new(source_kind: SourceKind, watts: f64) -> Self {
        Self {
            timestamp: Instant::now(),
            watts,
            source_kind,
        }
    }
}

/// Mean of a window at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WindowMean {
    pub mean_watts: f64,
    pub count: usize,
}

/// Averages handed to the controller
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Average {
    pub mean_grid_watts: f64,
    pub mean_wallbox_watts: f64,
    /// Number of grid samples the mean was computed from
    pub sample_count: usize,
}

/// Time-bounded buffer of readings, ordered by timestamp
#[derive(Debug, Clone)]
pub struct RollingWindow {
    span: Duration,
    readings: VecDeque<Reading>,
}

impl RollingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            readings: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Append a reading and evict everything a full span or more older than
    /// the newest reading
    pub fn record(&mut self, reading: Reading) {
        // Out-of-order readings would break eviction from the front
        let reading = match self.readings.back() {
            Some(last) if reading.timestamp < last.timestamp => Reading {
                timestamp: last.timestamp,
                ..reading
            },
            _ => reading,
        };
        self.readings.push_back(reading);

        let newest = reading.timestamp;
        while let Some(front) = self.readings.front() {
            if newest.duration_since(front.timestamp) >= self.span {
                self.readings.pop_front();
            } else {
                break;
            }
        }
    }

    /// Arithmetic mean of the readings in the half-open span `(now - span, now]`.
    /// An empty window yields a zero mean and zero count.
    pub fn mean(&self, now: Instant) -> WindowMean {
        let (sum, count) = self
            .readings
            .iter()
            .filter(|r| now.saturating_duration_since(r.timestamp) < self.span)
            .fold((0.0, 0usize), |(sum, count), r| (sum + r.watts, count + 1));
        if count == 0 {
            return WindowMean::default();
        }
        WindowMean {
            mean_watts: sum / count as f64,
            count,
        }
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }
}

/// Grid and wallbox windows averaged together at evaluation time
#[derive(Debug, Clone)]
pub struct Aggregator {
    grid: RollingWindow,
    wallbox: RollingWindow,
}

impl Aggregator {
    pub fn new(span: Duration) -> Self {
        Self {
            grid: RollingWindow::new(span),
            wallbox: RollingWindow::new(span),
        }
    }

    /// Route a reading to its window; PV readings are not averaged
    pub fn record(&mut self, reading: Reading) {
        match reading.source_kind {
            SourceKind::Grid => self.grid.record(reading),
            SourceKind::Wallbox => self.wallbox.record(reading),
            SourceKind::Pv => {}
        }
    }

    pub fn average(&self, now: Instant) -> Average {
        let grid = self.grid.mean(now);
        let wallbox = self.wallbox.mean(now);
        Average {
            mean_grid_watts: grid.mean_watts,
            mean_wallbox_watts: wallbox.mean_watts,
            sample_count: grid.count,
        }
    }

    pub fn grid_samples(&self) -> usize {
        self.grid.len()
    }

    /// Drop all samples so evaluation cycles do not overlap
    pub fn reset(&mut self) {
        self.grid.clear();
        self.wallbox.clear();
    }
}
