// ABOUTME: Log stream multiplexer for running project containers
// ABOUTME: Drains container output into bounded per-run buffers readable by many clients

use botyard_sandbox::{OutputChunk, OutputStream, StreamType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest single line kept; longer lines are cut
pub const MAX_LINE_BYTES: usize = 4 * 1024;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Monotonic within one run, starting at 1
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: StreamType,
    pub text: String,
}

/// Non-consuming view of a project's buffered output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSnapshot {
    pub lines: Vec<LogLine>,
    /// Pass back as `since` to fetch only newer lines
    pub next_seq: u64,
    /// Lines older than the retention window were evicted
    pub truncated: bool,
    pub ready: bool,
}

impl LogSnapshot {
    pub fn empty() -> Self {
        Self {
            lines: Vec::new(),
            next_seq: 0,
            truncated: false,
            ready: false,
        }
    }

    /// Build a snapshot from raw engine output (used when no live follower exists)
    pub fn from_text(
        text: &str,
        markers: &[String],
        since: Option<u64>,
        limit: Option<usize>,
    ) -> Self {
        let now = Utc::now();
        let all: Vec<LogLine> = text
            .lines()
            .enumerate()
            .map(|(i, line)| LogLine {
                seq: i as u64 + 1,
                timestamp: now,
                stream: StreamType::Stdout,
                text: truncate_line(line),
            })
            .collect();

        let ready = all
            .iter()
            .any(|line| markers.iter().any(|m| line.text.contains(m.as_str())));
        let next_seq = all.last().map(|l| l.seq).unwrap_or(0);
        let lines = select(all.into_iter(), since, limit);

        Self {
            lines,
            next_seq,
            truncated: false,
            ready,
        }
    }
}

/// Bounded, append-only line buffer; oldest lines are evicted past capacity
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    last_seq: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            last_seq: 0,
        }
    }

    pub fn push(&mut self, stream: StreamType, timestamp: DateTime<Utc>, text: &str) -> LogLine {
        self.last_seq += 1;
        let line = LogLine {
            seq: self.last_seq,
            timestamp,
            stream,
            text: truncate_line(text),
        };

        self.lines.push_back(line.clone());
        if self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        line
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn snapshot(&self, since: Option<u64>, limit: Option<usize>, ready: bool) -> LogSnapshot {
        let first_kept = self.lines.front().map(|l| l.seq).unwrap_or(self.last_seq + 1);
        let truncated = since.unwrap_or(0) + 1 < first_kept;

        LogSnapshot {
            lines: select(self.lines.iter().cloned(), since, limit),
            next_seq: self.last_seq,
            truncated,
            ready,
        }
    }
}

fn select(lines: impl Iterator<Item = LogLine>, since: Option<u64>, limit: Option<usize>) -> Vec<LogLine> {
    let mut selected: Vec<LogLine> = match since {
        Some(since) => lines.filter(|l| l.seq > since).collect(),
        None => lines.collect(),
    };

    // Keep the newest `limit` lines
    if let Some(max_count) = limit {
        if selected.len() > max_count {
            selected.drain(..selected.len() - max_count);
        }
    }
    selected
}

fn truncate_line(text: &str) -> String {
    let text = text.trim_end_matches('\r');
    if text.len() <= MAX_LINE_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_LINE_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

/// Readiness marker latch for one run.
///
/// `is_ready` stays true once a marker is seen; `take_event` reports it exactly once.
#[derive(Debug)]
pub struct ReadinessLatch {
    markers: Vec<String>,
    reached: AtomicBool,
    reported: AtomicBool,
}

impl ReadinessLatch {
    pub fn new(markers: Vec<String>) -> Self {
        Self {
            markers,
            reached: AtomicBool::new(false),
            reported: AtomicBool::new(false),
        }
    }

    /// Returns true when this line is the one that trips the latch
    pub fn observe(&self, line: &str) -> bool {
        if self.reached.load(Ordering::Acquire) {
            return false;
        }
        if self.markers.iter().any(|m| line.contains(m.as_str())) {
            return !self.reached.swap(true, Ordering::AcqRel);
        }
        false
    }

    pub fn is_ready(&self) -> bool {
        self.reached.load(Ordering::Acquire)
    }

    pub fn take_event(&self) -> bool {
        self.is_ready() && !self.reported.swap(true, Ordering::AcqRel)
    }
}

/// Buffer, live fan-out and readiness state for one container run
pub struct LogChannel {
    buffer: Mutex<LogBuffer>,
    sender: broadcast::Sender<LogLine>,
    latch: ReadinessLatch,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl LogChannel {
    fn new(capacity: usize, markers: Vec<String>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            buffer: Mutex::new(LogBuffer::new(capacity)),
            sender,
            latch: ReadinessLatch::new(markers),
            follower: Mutex::new(None),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| {
            warn!("Log buffer mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn record(&self, stream: StreamType, timestamp: DateTime<Utc>, text: &str) {
        let line = self.buffer().push(stream, timestamp, text);
        if self.latch.observe(&line.text) {
            debug!("Readiness marker observed");
        }
        // No subscribers is fine
        let _ = self.sender.send(line);
    }

    fn follower(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.follower
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_following(&self) -> bool {
        self.follower()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn abort_follower(&self) {
        let handle = self.follower().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for LogChannel {
    fn drop(&mut self) {
        self.abort_follower();
    }
}

/// Splits raw chunks into lines, holding partial lines per stream
#[derive(Default)]
struct LineAssembler {
    stdout: String,
    stderr: String,
}

impl LineAssembler {
    fn feed(&mut self, chunk: &OutputChunk) -> Vec<String> {
        let pending = match chunk.stream {
            StreamType::Stdout => &mut self.stdout,
            StreamType::Stderr => &mut self.stderr,
        };
        pending.push_str(&String::from_utf8_lossy(&chunk.data));

        let mut complete = Vec::new();
        while let Some(pos) = pending.find('\n') {
            let rest = pending.split_off(pos + 1);
            let mut line = std::mem::replace(pending, rest);
            line.pop();
            complete.push(line);
        }

        // Bound a runaway partial line
        if pending.len() > MAX_LINE_BYTES * 2 {
            complete.push(std::mem::take(pending));
        }
        complete
    }

    fn flush(&mut self) -> Vec<(StreamType, String)> {
        let mut rest = Vec::new();
        if !self.stdout.is_empty() {
            rest.push((StreamType::Stdout, std::mem::take(&mut self.stdout)));
        }
        if !self.stderr.is_empty() {
            rest.push((StreamType::Stderr, std::mem::take(&mut self.stderr)));
        }
        rest
    }
}

/// Per-project log channels keyed by project identifier.
///
/// Cloning is cheap; all clones share the same channels.
#[derive(Clone)]
pub struct LogMultiplexer {
    channels: Arc<RwLock<HashMap<String, Arc<LogChannel>>>>,
    capacity: usize,
    markers: Arc<Vec<String>>,
}

impl LogMultiplexer {
    pub fn new(capacity: usize, markers: Vec<String>) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            markers: Arc::new(markers),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    fn channel(&self, project_id: &str) -> Option<Arc<LogChannel>> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(project_id)
            .cloned()
    }

    /// Start a fresh, empty buffer for a new run, replacing any previous one
    pub fn open(&self, project_id: &str) {
        let channel = Arc::new(LogChannel::new(self.capacity, self.markers.to_vec()));
        let previous = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(project_id.to_string(), channel);
        if let Some(previous) = previous {
            previous.abort_follower();
        }
    }

    /// Drain `output` into the project's current buffer until the stream ends
    pub fn attach(&self, project_id: &str, mut output: OutputStream) {
        let Some(channel) = self.channel(project_id) else {
            warn!(project_id = %project_id, "No log buffer open, dropping output stream");
            return;
        };

        let pump_channel = Arc::clone(&channel);
        let id = project_id.to_string();
        let handle = tokio::spawn(async move {
            let mut assembler = LineAssembler::default();
            while let Some(chunk) = output.receiver.recv().await {
                for line in assembler.feed(&chunk) {
                    pump_channel.record(chunk.stream, chunk.timestamp, &line);
                }
            }
            for (stream, line) in assembler.flush() {
                pump_channel.record(stream, Utc::now(), &line);
            }
            debug!(project_id = %id, "Log stream ended");
        });

        channel.abort_follower();
        *channel.follower() = Some(handle);
    }

    /// Drop the project's buffer and stop draining its output
    pub fn discard(&self, project_id: &str) {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(project_id);
        if let Some(channel) = removed {
            channel.abort_follower();
            debug!(project_id = %project_id, "Discarded log buffer");
        }
    }

    pub fn snapshot(&self, project_id: &str, since: Option<u64>, limit: Option<usize>) -> Option<LogSnapshot> {
        let channel = self.channel(project_id)?;
        let ready = channel.latch.is_ready();
        let snapshot = channel.buffer().snapshot(since, limit, ready);
        Some(snapshot)
    }

    /// Whether the current run's output stream is still being drained.
    ///
    /// False once the engine closes the stream (container exited or removed).
    pub fn has_follower(&self, project_id: &str) -> bool {
        self.channel(project_id)
            .map(|c| c.is_following())
            .unwrap_or(false)
    }

    /// Feed engine-fetched output through the current run's readiness latch
    pub fn observe_text(&self, project_id: &str, text: &str) {
        let Some(channel) = self.channel(project_id) else {
            return;
        };
        for line in text.lines() {
            if channel.latch.observe(line) {
                debug!(project_id = %project_id, "Readiness marker observed in engine logs");
            }
        }
    }

    pub fn subscribe(&self, project_id: &str) -> Option<broadcast::Receiver<LogLine>> {
        self.channel(project_id).map(|c| c.sender.subscribe())
    }

    pub fn is_ready(&self, project_id: &str) -> bool {
        self.channel(project_id)
            .map(|c| c.latch.is_ready())
            .unwrap_or(false)
    }

    /// One-shot readiness signal for the current run
    pub fn take_ready_event(&self, project_id: &str) -> bool {
        self.channel(project_id)
            .map(|c| c.latch.take_event())
            .unwrap_or(false)
    }
}
