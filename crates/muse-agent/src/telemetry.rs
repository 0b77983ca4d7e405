//! Buffered telemetry with an explicit flush threshold.
//!
//! Entries accumulate in memory and are handed to a [`TelemetrySink`] once
//! the buffer reaches `flush_threshold`. Flushes run as tasks on the tokio
//! runtime so recording never blocks the caller. A failed flush puts the
//! entries back at the front and pauses automatic flushing for
//! [`FLUSH_RETRY_BACKOFF`]; while the sink stays down the buffer holds at
//! most `max_buffered` entries and drops the oldest.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use muse_core::config::Config;
use muse_tools::ToolOutcome;

use crate::observer::ToolObserver;
use crate::router::RouterDecision;

const MESSAGE_PREVIEW_CHARS: usize = 200;

pub const DEFAULT_MAX_BUFFERED: usize = 1000;

/// Pause before the next automatic flush after a failed one.
pub const FLUSH_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Intent,
    ToolCall,
    ToolResult,
    Failure,
    Clarification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TelemetryKind,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Destination for flushed entries.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, entries: &[TelemetryEntry]) -> anyhow::Result<()>;
}

/// Appends one JSON object per line to `telemetry-YYYY-MM-DD.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_for(&self, day: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("telemetry-{}.jsonl", day.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl TelemetrySink for JsonlSink {
    async fn write(&self, entries: &[TelemetryEntry]) -> anyhow::Result<()> {
        let mut out = String::new();
        for entry in entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file_for(Utc::now());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(out.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), count = entries.len(), "Telemetry flushed");
        Ok(())
    }
}

/// In-memory sink, optionally failing on demand.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<TelemetryEntry>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<TelemetryEntry> {
        lock(&self.entries).clone()
    }

    /// Number of `write` calls, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn write(&self, entries: &[TelemetryEntry]) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("sink unavailable");
        }
        lock(&self.entries).extend_from_slice(entries);
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Telemetry buffer. Cheap to share behind an `Arc`; flush tasks hold
/// their own handle to the buffer.
pub struct Telemetry {
    shared: Arc<Shared>,
}

struct Shared {
    buffer: Mutex<Vec<TelemetryEntry>>,
    sink: Arc<dyn TelemetrySink>,
    flush_threshold: usize,
    max_buffered: AtomicUsize,
    /// Serializes flushes so entries reach the sink in record order.
    write_lock: tokio::sync::Mutex<()>,
    flush_scheduled: AtomicBool,
    retry_at: Mutex<Option<Instant>>,
    dropped: AtomicUsize,
}

impl Shared {
    fn pending(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Drop the oldest entries beyond `max_buffered`.
    fn enforce_cap(&self, buffer: &mut Vec<TelemetryEntry>) {
        let max = self.max_buffered.load(Ordering::Relaxed);
        if buffer.len() <= max {
            return;
        }
        let excess = buffer.len() - max;
        buffer.drain(..excess);
        let before = self.dropped.fetch_add(excess, Ordering::Relaxed);
        // Once per buffer's worth of drops, not per entry.
        if before == 0 || before / max != (before + excess) / max {
            warn!(
                dropped = before + excess,
                max_buffered = max,
                "Telemetry buffer full, dropping oldest entries"
            );
        }
    }

    fn backing_off(&self) -> bool {
        lock(&self.retry_at).is_some_and(|at| Instant::now() < at)
    }

    async fn flush(&self) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let batch = std::mem::take(&mut *lock(&self.buffer));
        if batch.is_empty() {
            return Ok(0);
        }
        match self.sink.write(&batch).await {
            Ok(()) => {
                *lock(&self.retry_at) = None;
                Ok(batch.len())
            }
            Err(e) => {
                {
                    let mut buffer = lock(&self.buffer);
                    let newer = std::mem::replace(&mut *buffer, batch);
                    buffer.extend(newer);
                    self.enforce_cap(&mut buffer);
                }
                *lock(&self.retry_at) = Some(Instant::now() + FLUSH_RETRY_BACKOFF);
                Err(e)
            }
        }
    }
}

impl Telemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>, flush_threshold: usize) -> Self {
        let flush_threshold = flush_threshold.max(1);
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Vec::new()),
                sink,
                flush_threshold,
                max_buffered: AtomicUsize::new(DEFAULT_MAX_BUFFERED.max(flush_threshold)),
                write_lock: tokio::sync::Mutex::new(()),
                flush_scheduled: AtomicBool::new(false),
                retry_at: Mutex::new(None),
                dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Cap on buffered entries; never below the flush threshold.
    pub fn with_max_buffered(self, max_buffered: usize) -> Self {
        self.shared.max_buffered.store(
            max_buffered.max(self.shared.flush_threshold),
            Ordering::Relaxed,
        );
        self
    }

    /// JSONL telemetry under `telemetry.dir`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(JsonlSink::new(config.telemetry_dir())),
            config.telemetry_flush_threshold(),
        )
        .with_max_buffered(config.telemetry_max_buffered())
    }

    pub fn flush_threshold(&self) -> usize {
        self.shared.flush_threshold
    }

    pub fn max_buffered(&self) -> usize {
        self.shared.max_buffered.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Entries discarded because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn record(&self, kind: TelemetryKind, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        let len = {
            let mut buffer = lock(&self.shared.buffer);
            buffer.push(TelemetryEntry {
                timestamp: Utc::now(),
                kind,
                data,
            });
            self.shared.enforce_cap(&mut buffer);
            buffer.len()
        };
        if len >= self.shared.flush_threshold {
            self.schedule_flush();
        }
    }

    /// Start a background flush unless one is pending or the sink is in
    /// its retry backoff. Outside a runtime entries wait for [`flush`](Self::flush).
    fn schedule_flush(&self) {
        if self.shared.backing_off() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(pending = self.pending(), "No runtime, telemetry flush deferred");
            return;
        };
        if self.shared.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        handle.spawn(async move {
            shared.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = shared.flush().await {
                warn!(error = %e, pending = shared.pending(), "Telemetry flush failed");
            }
        });
    }

    /// Hand every buffered entry to the sink. Returns the number written.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        self.shared.flush().await
    }

    pub fn log_intent(&self, user_id: Option<&str>, message: &str, decision: &RouterDecision) {
        self.record(
            TelemetryKind::Intent,
            json!({
                "userId": user_id,
                "message": message.chars().take(MESSAGE_PREVIEW_CHARS).collect::<String>(),
                "intent": decision.intent,
                "confidence": decision.confidence,
                "needsClarification": decision.needs_clarification,
            }),
        );
    }

    pub fn log_clarification(
        &self,
        user_id: Option<&str>,
        message: &str,
        question: &str,
        decision: &RouterDecision,
    ) {
        self.record(
            TelemetryKind::Clarification,
            json!({
                "userId": user_id,
                "originalMessage": message.chars().take(MESSAGE_PREVIEW_CHARS).collect::<String>(),
                "question": question,
                "routerIntent": decision.intent,
                "confidence": decision.confidence,
            }),
        );
    }
}

/// Feeds tool dispatches into a [`Telemetry`] buffer.
pub struct TelemetryObserver {
    telemetry: Arc<Telemetry>,
    user_id: Option<String>,
}

impl TelemetryObserver {
    pub fn new(telemetry: Arc<Telemetry>, user_id: Option<String>) -> Self {
        Self { telemetry, user_id }
    }
}

impl ToolObserver for TelemetryObserver {
    fn on_tool_call(&self, tool: &str, params: &Value) {
        self.telemetry.record(
            TelemetryKind::ToolCall,
            json!({ "userId": self.user_id, "tool": tool, "params": params }),
        );
    }

    fn on_tool_result(&self, tool: &str, outcome: &ToolOutcome) {
        self.telemetry.record(
            TelemetryKind::ToolResult,
            json!({ "userId": self.user_id, "tool": tool, "success": outcome.is_success() }),
        );
        if !outcome.is_success() {
            self.telemetry.record(
                TelemetryKind::Failure,
                json!({
                    "userId": self.user_id,
                    "tool": tool,
                    "error": outcome.error_message(),
                }),
            );
        }
    }
}
