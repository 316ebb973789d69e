// Time conversions intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use prof_agent_common::{Event, EventTag};

use super::recording::Recording;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    /// Event name (method, blocking kind or marker)
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "B" = begin, "E" = end, "i" = instant, "M" = metadata
    ph: String,
    /// Timestamp in microseconds
    ts: f64,
    pid: u32,
    tid: u32,
    /// Instant event scope: "g" = global, "t" = thread
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Chrome trace exporter for timeline visualization
#[derive(Debug, Default)]
pub struct ChromeTraceExporter {
    events: Vec<ChromeTraceEvent>,
    /// Method id -> display name, when the instrumentor's names are known
    method_names: HashMap<u16, String>,
    thread_names: BTreeMap<u16, String>,
    /// First timestamp seen, in nanoseconds
    start_timestamp_ns: Option<u64>,
    pid: u32,
}

impl ChromeTraceExporter {
    #[must_use]
    pub fn new() -> Self {
        Self { pid: std::process::id(), ..Self::default() }
    }

    pub fn set_method_name(&mut self, method_id: u16, name: impl Into<String>) {
        self.method_names.insert(method_id, name.into());
    }

    fn method_name(&self, method_id: u16) -> String {
        self.method_names.get(&method_id).cloned().unwrap_or_else(|| format!("method#{method_id}"))
    }

    fn relative_us(&mut self, timestamp_ns: u64) -> f64 {
        let start = *self.start_timestamp_ns.get_or_insert(timestamp_ns);
        timestamp_ns.saturating_sub(start) as f64 / 1000.0
    }

    fn push(&mut self, name: String, cat: &str, ph: &str, ts: f64, tid: u32, args: Option<HashMap<String, JsonValue>>) {
        let s = (ph == "i").then(|| if tid == 0 { "g" } else { "t" }.to_string());
        self.events.push(ChromeTraceEvent {
            name,
            cat: cat.to_string(),
            ph: ph.to_string(),
            ts,
            pid: self.pid,
            tid,
            s,
            args,
        });
    }

    /// Add every timestamped event of a recording
    pub fn add_recording(&mut self, recording: &Recording) {
        for (id, name) in recording.thread_names() {
            self.thread_names.insert(id, name.to_string());
        }
        for item in recording.events() {
            self.add_event(item.thread, &item.event);
        }
    }

    /// Add one event
    ///
    /// Thread ids are shifted by one so that tid 0 stays free for global
    /// events. Events without a timestamp are ignored.
    pub fn add_event(&mut self, thread: Option<u16>, event: &Event<'_>) {
        let tid = thread.map_or(0, |t| u32::from(t) + 1);
        match *event {
            Event::Method { tag, method_id, timestamp, thread_cpu } => {
                let ts = self.relative_us(timestamp);
                let (cat, ph) = match tag {
                    EventTag::RootEntry => ("root", "B"),
                    EventTag::RootExit => ("root", "E"),
                    EventTag::MarkerEntry => ("marker", "B"),
                    EventTag::MarkerExit => ("marker", "E"),
                    EventTag::MethodExit => ("method", "E"),
                    _ => ("method", "B"),
                };
                let args = thread_cpu.map(|cpu| {
                    HashMap::from([("thread_cpu_ns".to_string(), serde_json::json!(cpu))])
                });
                let name = self.method_name(method_id);
                self.push(name, cat, ph, ts, tid, args);
            }
            Event::Timestamp { tag, timestamp } => {
                let ts = self.relative_us(timestamp);
                let (name, ph) = match tag {
                    EventTag::WaitEntry => ("wait", "B"),
                    EventTag::WaitExit => ("wait", "E"),
                    EventTag::SleepEntry => ("sleep", "B"),
                    EventTag::SleepExit => ("sleep", "E"),
                    EventTag::MonitorEntry => ("monitor", "B"),
                    EventTag::MonitorExit => ("monitor", "E"),
                    EventTag::ParkEntry => ("park", "B"),
                    EventTag::ParkExit => ("park", "E"),
                    EventTag::ThreadsSuspended => ("threads suspended", "i"),
                    EventTag::ThreadsResumed => ("threads resumed", "i"),
                    _ => ("thread dump", "i"),
                };
                self.push(name.to_string(), "blocking", ph, ts, tid, None);
            }
            Event::ProfilePointHit { point_id, timestamp, .. } => {
                let ts = self.relative_us(timestamp);
                let args = HashMap::from([("point_id".to_string(), serde_json::json!(point_id))]);
                self.push(format!("profiling point {point_id}"), "profiling_point", "i", ts, tid, Some(args));
            }
            _ => {}
        }
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Returns an error if serialization or the writer fails
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        let mut all_events = self.events.clone();

        for (id, name) in &self.thread_names {
            let args = HashMap::from([("name".to_string(), serde_json::json!(name))]);
            all_events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                pid: self.pid,
                tid: u32::from(*id) + 1,
                s: None,
                args: Some(args),
            });
        }

        let trace = ChromeTrace { trace_events: all_events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace).context("Failed to write trace JSON")?;
        Ok(())
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
