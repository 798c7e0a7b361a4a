//! Structured logging for the catalog framework
//!
//! Human-readable output for development, one JSON object per event for
//! production. Filtering follows `RUST_LOG` when set, otherwise the
//! configured level.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// A log record in JSON form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<OperationMetrics>,
}

/// Process-level context stamped on every JSON entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub app_version: String,
    pub hostname: String,
    pub pid: u32,
    pub thread_id: String,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            thread_id: format!("{:?}", std::thread::current().id()),
        }
    }
}

/// Metrics lifted out of well-known event fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub duration_ms: Option<u64>,
    pub items_count: Option<u64>,
    pub sources_count: Option<u64>,
}

/// Layer rendering each event as a [`StructuredLogEntry`] on stdout
pub struct JsonFormatter {
    include_context: bool,
}

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let metrics = visitor.extract_metrics();
        let entry = StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level_name(event.metadata().level()).to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            context: self.include_context.then(ExecutionContext::default),
            metrics,
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stdout(), "{}", json);
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(
                field.name().to_string(),
                Value::String(format!("{:?}", value)),
            );
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), Value::Bool(value));
    }
}

impl JsonVisitor {
    fn extract_metrics(&self) -> Option<OperationMetrics> {
        let metrics = OperationMetrics {
            duration_ms: self.get_u64_field("duration_ms"),
            items_count: self.get_u64_field("items_count"),
            sources_count: self.get_u64_field("sources_count"),
        };

        if metrics.duration_ms.is_some()
            || metrics.items_count.is_some()
            || metrics.sources_count.is_some()
        {
            Some(metrics)
        } else {
            None
        }
    }

    fn get_u64_field(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(|v| v.as_u64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging section of the framework configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    /// ANSI colours (pretty format only)
    pub color_output: bool,
    /// Attach process context to JSON entries
    pub include_context: bool,
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            color_output: true,
            include_context: true,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_structured_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format {
        LogFormat::Json => {
            let subscriber = Registry::default().with(env_filter).with(JsonFormatter {
                include_context: config.include_context,
            });
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(config.include_line_numbers)
                .with_ansi(config.color_output)
                .with_span_events(FmtSpan::CLOSE);
            let subscriber = Registry::default().with(env_filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

/// Measures one facade operation and logs its outcome
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
    request_id: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>, context: &LogContext) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.into(),
            request_id: context.request_id.clone(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish_with_result<T, E: std::fmt::Display>(&self, result: &Result<T, E>) {
        let duration_ms = self.start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => {
                tracing::info!(
                    operation = %self.operation_name,
                    request_id = %self.request_id,
                    duration_ms = duration_ms,
                    success = true,
                    "Operation completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    operation = %self.operation_name,
                    request_id = %self.request_id,
                    duration_ms = duration_ms,
                    success = false,
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }
}

/// Correlation id attached to the log lines of one operation
#[derive(Debug, Clone)]
pub struct LogContext {
    pub request_id: String,
}

impl LogContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_log_entry_serialization() {
        let entry = StructuredLogEntry {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            level: "INFO".to_string(),
            target: "federation::engine".to_string(),
            message: "Federated query completed".to_string(),
            fields: HashMap::from([("source_id".to_string(), Value::from("remote-a"))]),
            context: Some(ExecutionContext::default()),
            metrics: Some(OperationMetrics {
                duration_ms: Some(42),
                items_count: Some(10),
                sources_count: Some(3),
            }),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"source_id\":\"remote-a\""));
        assert!(json.contains("duration_ms"));
        assert!(json.contains("Federated query completed"));
    }

    #[test]
    fn test_metrics_only_when_fields_present() {
        let mut visitor = JsonVisitor::default();
        assert!(visitor.extract_metrics().is_none());

        visitor
            .fields
            .insert("items_count".to_string(), Value::from(7u64));
        let metrics = visitor.extract_metrics().unwrap();
        assert_eq!(metrics.items_count, Some(7));
        assert_eq!(metrics.duration_ms, None);
    }

    #[test]
    fn test_logging_config_from_toml_like_json() {
        let config: LoggingConfig =
            serde_json::from_value(serde_json::json!({"level": "debug", "format": "json"})).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_context);
    }

    #[test]
    fn test_operation_timer_measures_elapsed() {
        let context = LogContext::new();
        let timer = OperationTimer::new("query", &context);
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
        timer.finish_with_result::<(), String>(&Ok(()));
    }
}
