use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL log for one session.
///
/// Every line is a compact JSON object with `type`, `session_id` and a
/// UTC `ts` stamp; the caller payload is merged last, so it may override
/// the defaults. Clones share the same file and serialize their writes.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: Arc<PathBuf>,
    session_id: Arc<str>,
    write_lock: Arc<Mutex<()>>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            session_id: Arc::from(session_id.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), json!(event_type));
        event.insert("session_id".to_string(), json!(self.session_id.as_ref()));
        event.insert(
            "ts".to_string(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        event.extend(payload);

        self.append_line(&serde_json::to_string(&event)?)?;
        Ok(Value::Object(event))
    }

    /// Shorthand for non-fatal conditions that should still leave a trace.
    pub fn warning(&self, message: impl Into<String>) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("message".to_string(), json!(message.into()));
        self.emit("warning", payload)
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("session log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_ref())?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}
