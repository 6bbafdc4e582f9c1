use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSON Lines log of everything that happens to one storyboard view.
///
/// Each line carries `type`, `storyboard_id` and `ts`; the payload is merged last and may
/// override them. Clones share one file lock, so the session worker and the caller thread can
/// both write.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    storyboard_id: i64,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, storyboard_id: i64) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                storyboard_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn storyboard_id(&self) -> i64 {
        self.inner.storyboard_id
    }

    /// Writes a serde-tagged event (`#[serde(tag = "type")]`).
    pub fn record<T: Serialize>(&self, event: &T) -> anyhow::Result<Value> {
        let payload = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            other => bail!("event must serialize to a JSON object, got {other}"),
        };
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("event")
            .to_string();
        self.emit(&event_type, payload)
    }

    /// Stamps `payload` with the envelope fields and appends it as one line.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut line = self.envelope(event_type);
        line.extend(payload);
        let line = Value::Object(line);
        self.append(&serde_json::to_string(&line)?)?;
        Ok(line)
    }

    fn envelope(&self, event_type: &str) -> EventPayload {
        let mut envelope = EventPayload::new();
        envelope.insert("type".into(), event_type.into());
        envelope.insert("storyboard_id".into(), self.inner.storyboard_id.into());
        envelope.insert("ts".into(), timestamp_now().into());
        envelope
    }

    fn append(&self, line: &str) -> anyhow::Result<()> {
        let path = &self.inner.path;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
        }
        let _held = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed opening {}", path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Current UTC time as RFC3339 with microseconds, the format every timestamp in the log uses.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
