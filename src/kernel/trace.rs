//! Instrumentation and Tracing System
//!
//! Provides tracing and statistics for iteration runs and the run loop.
//!
//! Design:
//! - Lightweight event tracing with timestamps
//! - Counters for run lifecycle, slices and yields
//! - Slice timing (how long each synchronous stretch held the loop)
//! - Ring buffer for recent events (bounded memory)
//! - Disabled by default: a disabled tracer only bumps counters

use super::error::IterResult;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of events to keep in the trace buffer
pub const TRACE_BUFFER_SIZE: usize = 1000;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceCategory {
    /// Run start, completion, halt, re-entry
    Lifecycle,
    /// Synchronous slices, yields and resumes
    Slice,
    /// Run loop ticks
    Scheduler,
}

impl std::fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceCategory::Lifecycle => write!(f, "LIFECYCLE"),
            TraceCategory::Slice => write!(f, "SLICE"),
            TraceCategory::Scheduler => write!(f, "SCHED"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Timestamp in milliseconds (platform clock)
    pub timestamp: f64,
    pub category: TraceCategory,
    /// Event name/type
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Associated task ID (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<u64>,
    /// Duration in milliseconds (for span events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl TraceEvent {
    /// Create a new instant event
    pub fn instant(timestamp: f64, category: TraceCategory, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            category,
            name: name.into(),
            detail: None,
            task: None,
            duration: None,
        }
    }

    /// Add details
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Add task ID
    pub fn with_task(mut self, task: u64) -> Self {
        self.task = Some(task);
        self
    }

    /// Add duration
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Timing counters for one kind of span
#[derive(Debug, Clone, Serialize)]
pub struct PerfCounters {
    /// Total span count
    pub count: u64,
    /// Total time spent (ms)
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_time: 0.0,
            min_time: f64::MAX,
            max_time: 0.0,
        }
    }

    pub fn record(&mut self, duration: f64) {
        self.count += 1;
        self.total_time += duration;
        if duration < self.min_time {
            self.min_time = duration;
        }
        if duration > self.max_time {
            self.max_time = duration;
        }
    }

    /// Average time per span
    pub fn avg_time(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_time / self.count as f64
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Iteration run counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationStats {
    /// Runs that passed the re-entrancy guard
    pub runs_started: u64,
    /// Runs that reached natural exhaustion
    pub runs_completed: u64,
    /// Runs stopped by an outside state change
    pub runs_halted: u64,
    /// `execute` calls turned away by the re-entrancy guard
    pub reentries: u64,
    /// Element effects applied
    pub elements: u64,
    /// Yields to the run loop
    pub yields: u64,
    /// Synchronous slice timings
    pub slices: PerfCounters,
}

impl IterationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs started but neither completed nor halted
    pub fn in_flight(&self) -> u64 {
        self.runs_started
            .saturating_sub(self.runs_completed + self.runs_halted)
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Total ticks executed
    pub tick_count: u64,
    /// Continuations run (cumulative)
    pub continuations_run: u64,
    /// Total tick time (ms)
    pub total_tick_time: f64,
    /// Maximum tick time
    pub max_tick_time: f64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tick
    pub fn record_tick(&mut self, ran: usize, duration: f64) {
        self.tick_count += 1;
        self.continuations_run += ran as u64;
        self.total_tick_time += duration;
        if duration > self.max_tick_time {
            self.max_tick_time = duration;
        }
    }

    /// Average continuations per tick
    pub fn avg_per_tick(&self) -> f64 {
        if self.tick_count == 0 {
            0.0
        } else {
            self.continuations_run as f64 / self.tick_count as f64
        }
    }

    /// Average tick duration
    pub fn avg_tick_time(&self) -> f64 {
        if self.tick_count == 0 {
            0.0
        } else {
            self.total_tick_time / self.tick_count as f64
        }
    }
}

/// Tracer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    pub enabled: bool,
    /// Ring buffer capacity
    pub capacity: usize,
    /// Category filter (None = all)
    pub filter: Option<Vec<TraceCategory>>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: TRACE_BUFFER_SIZE,
            filter: None,
        }
    }
}

/// The main tracer/instrumentation system
#[derive(Debug)]
pub struct Tracer {
    config: TracerConfig,
    /// Ring buffer of recent events
    events: VecDeque<TraceEvent>,
    pub iteration: IterationStats,
    pub scheduler: SchedulerStats,
    /// Start time for uptime calculation
    start_time: f64,
}

impl Tracer {
    /// Create a new (disabled) tracer
    pub fn new() -> Self {
        Self::with_config(TracerConfig::default())
    }

    pub fn with_config(config: TracerConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config: TracerConfig {
                capacity,
                ..config
            },
            events: VecDeque::with_capacity(capacity),
            iteration: IterationStats::new(),
            scheduler: SchedulerStats::new(),
            start_time: 0.0,
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Set the start time (for uptime calculation)
    pub fn set_start_time(&mut self, time: f64) {
        self.start_time = time;
    }

    pub fn uptime(&self, now: f64) -> f64 {
        now - self.start_time
    }

    pub fn enable(&mut self) {
        self.config.enabled = true;
    }

    pub fn disable(&mut self) {
        self.config.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Set category filter (None = trace all)
    pub fn set_filter(&mut self, categories: Option<Vec<TraceCategory>>) {
        self.config.filter = categories;
    }

    fn should_trace(&self, category: TraceCategory) -> bool {
        if !self.config.enabled {
            return false;
        }
        match &self.config.filter {
            None => true,
            Some(cats) => cats.contains(&category),
        }
    }

    /// Record a trace event
    pub fn trace(&mut self, event: TraceEvent) {
        if !self.should_trace(event.category) {
            return;
        }

        if self.events.len() >= self.config.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Quick trace without building a full event
    pub fn trace_instant(&mut self, timestamp: f64, category: TraceCategory, name: &str) {
        if self.should_trace(category) {
            self.trace(TraceEvent::instant(timestamp, category, name));
        }
    }

    /// Get recent events
    pub fn events(&self) -> &VecDeque<TraceEvent> {
        &self.events
    }

    /// Get events of a specific category
    pub fn events_by_category(&self, category: TraceCategory) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Get events for a specific task
    pub fn events_by_task(&self, task: u64) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.task == Some(task))
            .collect()
    }

    /// Buffered events as a JSON array
    pub fn export_json(&self) -> IterResult<String> {
        Ok(serde_json::to_string(&self.events)?)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn reset_stats(&mut self) {
        self.iteration = IterationStats::new();
        self.scheduler = SchedulerStats::new();
    }

    /// Reset everything (events and stats)
    pub fn reset(&mut self) {
        self.clear_events();
        self.reset_stats();
    }

    /// Get a summary report
    pub fn summary(&self, now: f64) -> TraceSummary {
        TraceSummary {
            uptime: self.uptime(now),
            enabled: self.config.enabled,
            event_count: self.events.len(),
            runs_started: self.iteration.runs_started,
            runs_completed: self.iteration.runs_completed,
            runs_halted: self.iteration.runs_halted,
            reentries: self.iteration.reentries,
            elements: self.iteration.elements,
            yields: self.iteration.yields,
            avg_slice_time: self.iteration.slices.avg_time(),
            max_slice_time: self.iteration.slices.max_time,
            tick_count: self.scheduler.tick_count,
            avg_tick_time: self.scheduler.avg_tick_time(),
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of trace/stats data
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub uptime: f64,
    pub enabled: bool,
    pub event_count: usize,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_halted: u64,
    pub reentries: u64,
    pub elements: u64,
    pub yields: u64,
    pub avg_slice_time: f64,
    pub max_slice_time: f64,
    pub tick_count: u64,
    pub avg_tick_time: f64,
}

impl std::fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Iteration Statistics ===")?;
        writeln!(f, "Uptime: {:.2}s", self.uptime / 1000.0)?;
        writeln!(
            f,
            "Tracing: {}",
            if self.enabled { "ON" } else { "OFF" }
        )?;
        writeln!(f, "Events buffered: {}", self.event_count)?;
        writeln!(f)?;
        writeln!(f, "--- Runs ---")?;
        writeln!(f, "Started: {}", self.runs_started)?;
        writeln!(f, "Completed: {}", self.runs_completed)?;
        writeln!(f, "Halted: {}", self.runs_halted)?;
        writeln!(f, "Re-entries: {}", self.reentries)?;
        writeln!(f)?;
        writeln!(f, "--- Slices ---")?;
        writeln!(f, "Elements: {}", self.elements)?;
        writeln!(f, "Yields: {}", self.yields)?;
        writeln!(f, "Avg slice: {:.3}ms", self.avg_slice_time)?;
        writeln!(f, "Max slice: {:.3}ms", self.max_slice_time)?;
        writeln!(f)?;
        writeln!(f, "--- Scheduler ---")?;
        writeln!(f, "Ticks: {}", self.tick_count)?;
        writeln!(f, "Avg tick: {:.3}ms", self.avg_tick_time)?;
        Ok(())
    }
}
