use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only run log, one compact JSON object per line.
///
/// Every event carries `type`, `run_id` and `ts`; payload keys are merged
/// last and may override them.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Records one node invocation and whatever it returned.
    pub fn node_executed<T: Serialize>(&self, node_id: &str, outputs: &T) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("node".to_string(), Value::String(node_id.to_string()));
        payload.insert("outputs".to_string(), serde_json::to_value(outputs)?);
        self.emit("node_executed", payload)
    }

    pub fn artifact_written(&self, node_id: &str, path: &Path) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("node".to_string(), Value::String(node_id.to_string()));
        payload.insert(
            "path".to_string(),
            Value::String(path.to_string_lossy().to_string()),
        );
        self.emit("artifact_written", payload)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn read_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-7");

        let mut payload = EventPayload::new();
        payload.insert("folder".to_string(), json!("/assets"));
        let emitted = writer.emit("run_started", payload)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], emitted);
        assert_eq!(lines[0]["type"], json!("run_started"));
        assert_eq!(lines[0]["run_id"], json!("run-7"));
        assert_eq!(lines[0]["folder"], json!("/assets"));

        let ts = lines[0]["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "run-7");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), json!("other"));
        let emitted = writer.emit("run_started", payload)?;
        assert_eq!(emitted["run_id"], json!("other"));
        assert_eq!(writer.run_id(), "run-7");
        assert_eq!(writer.path(), temp.path().join("events.jsonl"));
        Ok(())
    }

    #[test]
    fn node_and_artifact_events_append_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-7");

        writer.node_executed("MatrixStringChopper", &json!({"middle": "x"}))?;
        writer.artifact_written("MatrixAssetGrid5", Path::new("/out/grid.png"))?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], json!("node_executed"));
        assert_eq!(lines[0]["node"], json!("MatrixStringChopper"));
        assert_eq!(lines[0]["outputs"]["middle"], json!("x"));
        assert_eq!(lines[1]["type"], json!("artifact_written"));
        assert_eq!(lines[1]["path"], json!("/out/grid.png"));
        Ok(())
    }
}
