//! Observability hook shared by the engine and dispatchers.
//!
//! `log(level, message, data)` calls are forwarded to `tracing` with the
//! execution id attached as a field, so whatever subscriber the host installs
//! can filter and correlate them per run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Severity of a hook log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Emit one structured log entry tagged with `execution_id`.
pub fn emit(level: LogLevel, execution_id: Uuid, message: &str, data: Option<&Value>) {
    let data = data.map(Value::to_string).unwrap_or_default();

    match level {
        LogLevel::Debug => debug!(%execution_id, %data, "{message}"),
        LogLevel::Info => info!(%execution_id, %data, "{message}"),
        LogLevel::Warn => warn!(%execution_id, %data, "{message}"),
        LogLevel::Error => error!(%execution_id, %data, "{message}"),
    }
}
