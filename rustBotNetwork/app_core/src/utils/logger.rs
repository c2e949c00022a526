use log::kv::{self, Key, Value, Visitor};
use log::{Log, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CURRENT_RUN_ID: RefCell<Option<String>> = RefCell::new(None);
}

/// Sets the current run id for the calling thread. Every stage call should
/// wrap its body with this set so that concurrently-running runs (different
/// `run_id`s in different async tasks) still tag their log lines correctly.
pub fn set_current_run_id(run_id: String) {
    CURRENT_RUN_ID.with(|id_cell| {
        *id_cell.borrow_mut() = Some(run_id);
    });
}

pub fn clear_current_run_id() {
    CURRENT_RUN_ID.with(|id_cell| {
        *id_cell.borrow_mut() = None;
    });
}

pub fn current_run_id() -> Option<String> {
    CURRENT_RUN_ID.with(|id_cell| id_cell.borrow().clone())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub run_id: Option<String>,
    pub name: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

struct JsonLogger;

struct KeyValueCollector<'a>(&'a mut HashMap<String, serde_json::Value>);

impl<'a> Visitor<'a> for KeyValueCollector<'a> {
    fn visit_pair(&mut self, key: Key<'a>, value: Value<'a>) -> Result<(), kv::Error> {
        self.0
            .insert(key.as_str().to_string(), json!(value.to_string()));
        Ok(())
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let run_id = current_run_id();
        let mut extra_fields = HashMap::new();
        let mut collector = KeyValueCollector(&mut extra_fields);
        if let Err(e) = record.key_values().visit(&mut collector) {
            eprintln!("error visiting log key-value pairs: {:?}", e);
        }

        let log_record = JsonLogRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: record.level().to_string(),
            message: format!("{}", record.args()),
            run_id,
            name: record.target().to_string(),
            module_path: record.module_path().map(|s| s.to_string()),
            file: record.file().map(|s| s.to_string()),
            line: record.line(),
            extra: extra_fields,
        };

        println!(
            "{}",
            serde_json::to_string(&log_record).expect("failed to serialize log record to JSON")
        );
    }

    fn flush(&self) {}
}

static LOGGER: JsonLogger = JsonLogger;
static INIT_LOGGER_ONCE: OnceCell<()> = OnceCell::new();

/// Initializes the process-wide JSON logger. Safe to call from multiple call
/// sites (CLI main, tests); only the first call takes effect.
pub fn init_logger() -> Result<(), SetLoggerError> {
    INIT_LOGGER_ONCE
        .get_or_try_init(|| {
            log::set_logger(&LOGGER)?;
            log::set_max_level(log::LevelFilter::Info);
            Ok(())
        })
        .map(|_| ())
}

/// Logs a stage transition (`PENDING`/`RUNNING`/`OK`/`DEGRADED`/`FAILED`).
pub fn log_stage_event(stage_name: &str, status: &str, details: &serde_json::Value) {
    let details_str = details.to_string();
    log::info!(
        target: stage_name,
        status = status,
        details = details_str.as_str();
        "Stage Event"
    );
}

/// Logs an external-collaborator call (search, ad archive, warehouse AI
/// primitive) with enough structure to reconstruct provenance later.
pub fn log_provider_call(provider: &str, operation: &str, outcome: &str) {
    log::info!(
        target: provider,
        operation = operation,
        outcome = outcome;
        "Provider Call"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::info;
    use serde_json::json;

    #[test]
    fn test_logger_functionality() {
        let _ = init_logger();
        set_current_run_id("run_test_123".to_string());

        info!(target: "root", "This is a root logger message.");

        let details = json!({ "stage": "discovery" });
        log_stage_event("discovery", "RUNNING", &details);
        log_provider_call("search_provider", "query", "ok");

        clear_current_run_id();
        info!(target: "root", "This message should not have a run_id.");

        set_current_run_id("run_test_456".to_string());
        log::warn!(target: "root", "This is a warning for another run.");
    }

    #[test]
    fn current_run_id_reflects_set_and_clear() {
        set_current_run_id("run_abc".to_string());
        assert_eq!(current_run_id(), Some("run_abc".to_string()));
        clear_current_run_id();
        assert_eq!(current_run_id(), None);
    }
}
