use common::{
    init_structured_logging, ExecutionContext, LogContext, LogFormat, LoggingConfig, OperationTimer,
    StructuredLogEntry,
};
use serde_json::Value;
use std::collections::HashMap;

#[test]
fn test_json_subscriber_installs_once() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Json,
        ..LoggingConfig::default()
    };

    assert!(init_structured_logging(&config).is_ok());
    tracing::info!(items_count = 3u64, duration_ms = 12u64, "Create completed");

    let timer = OperationTimer::new("query", &LogContext::new());
    timer.finish_with_result::<(), &str>(&Err("no usable sources"));

    assert!(init_structured_logging(&config).is_err());
}

#[test]
fn test_entry_fields_are_flattened() {
    let entry = StructuredLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: "WARN".to_string(),
        target: "federation::resolver".to_string(),
        message: "Dropping 'beta' from query".to_string(),
        fields: HashMap::from([("source_id".to_string(), Value::from("beta"))]),
        context: None,
        metrics: None,
    };

    let json: Value = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["source_id"], "beta");
    assert!(json.get("context").is_none());
    assert!(json.get("metrics").is_none());

    let back: StructuredLogEntry = serde_json::from_value(json).unwrap();
    assert_eq!(back.fields.get("source_id"), Some(&Value::from("beta")));
}

#[test]
fn test_execution_context_describes_process() {
    let context = ExecutionContext::default();
    assert_eq!(context.pid, std::process::id());
    assert!(!context.hostname.is_empty());
    assert!(!context.app_version.is_empty());
}

#[test]
fn test_request_ids_are_unique() {
    assert_ne!(LogContext::new().request_id, LogContext::new().request_id);
}
