use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Keys owned by the log itself; payload entries with these names are dropped.
const ENVELOPE_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionStarted,
    UserTurn,
    ImageDuplicateSkipped,
    CompletionRequest,
    CompletionSucceeded,
    CompletionFailed,
    HistoryCleared,
    TranscriptExported,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::UserTurn => "user_turn",
            EventKind::ImageDuplicateSkipped => "image_duplicate_skipped",
            EventKind::CompletionRequest => "completion_request",
            EventKind::CompletionSucceeded => "completion_succeeded",
            EventKind::CompletionFailed => "completion_failed",
            EventKind::HistoryCleared => "history_cleared",
            EventKind::TranscriptExported => "transcript_exported",
        }
    }
}

/// Session event log, one JSON object per line.
///
/// The file is opened on first use and kept open. A failed open is retried on
/// the next event. `seq` counts attempted events per writer, so gaps in the
/// file show where writes were lost.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<LogState>,
}

#[derive(Debug)]
struct LogState {
    path: PathBuf,
    session_id: String,
    next_seq: AtomicU64,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(LogState {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: AtomicU64::new(0),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> Result<Value> {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = build_event(kind, &self.shared.session_id, seq, payload);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut slot = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(open_log(&self.shared.path)?);
        }
        if let Some(file) = slot.as_mut() {
            if let Err(err) = file.write_all(line.as_bytes()) {
                // Reopen next time; the handle may point at a removed file.
                *slot = None;
                return Err(err)
                    .with_context(|| format!("failed writing {}", self.shared.path.display()));
            }
        }
        Ok(event)
    }
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed opening {}", path.display()))
}

fn build_event(kind: EventKind, session_id: &str, seq: u64, payload: EventPayload) -> Value {
    let mut event: Map<String, Value> = payload
        .into_iter()
        .filter(|(key, _)| !ENVELOPE_KEYS.contains(&key.as_str()))
        .collect();
    event.insert("type".into(), kind.as_str().into());
    event.insert("session_id".into(), session_id.into());
    event.insert("seq".into(), seq.into());
    event.insert("ts".into(), now_utc_iso().into());
    Value::Object(event)
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
