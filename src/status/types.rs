//! Operation status records
//!
//! Serialized form matches the status file: a JSON object keyed by tool
//! name whose values hold `status`, `command`, `start_time`, `end_time`
//! and `result`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Lifecycle state of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Initializing,
    Running,
    #[serde(alias = "Successfully")]
    Completed,
    Failed,
    #[serde(alias = "Execution Error")]
    ExecutionError,
}

impl OperationState {
    /// Completed, Failed and ExecutionError admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::ExecutionError
        )
    }

    /// Counted under `failed` in summaries
    pub fn is_failure(&self) -> bool {
        matches!(self, OperationState::Failed | OperationState::ExecutionError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Initializing => "Initializing",
            OperationState::Running => "Running",
            OperationState::Completed => "Completed",
            OperationState::Failed => "Failed",
            OperationState::ExecutionError => "ExecutionError",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload attached to a status record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Keys written by other producers are kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OperationResult {
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_log_path(mut self, log_path: impl Into<String>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Overlay `other` onto `self`; fields present in `other` win
    pub fn merge(&mut self, other: OperationResult) {
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if other.log_path.is_some() {
            self.log_path = other.log_path;
        }
        if other.error.is_some() {
            self.error = other.error;
        }
        self.extra.extend(other.extra);
    }
}

/// Lifecycle record for one tool's execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Filled from the map key when loaded from disk
    #[serde(skip)]
    pub tool_name: String,

    pub status: OperationState,

    pub command: String,

    #[serde(deserialize_with = "deserialize_timestamp")]
    pub start_time: DateTime<Utc>,

    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub result: Option<OperationResult>,
}

impl OperationStatus {
    pub fn new(tool_name: String, status: OperationState, command: String) -> Self {
        let now = Utc::now();
        Self {
            tool_name,
            status,
            command,
            start_time: now,
            end_time: if status.is_terminal() { Some(now) } else { None },
            result: None,
        }
    }

    /// Time between start and end, if the operation finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Aggregate counts over the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
}

impl StatusSummary {
    /// Build from totals; `in_progress` is derived so the identity always holds
    pub fn from_counts(total: usize, completed: usize, failed: usize) -> Self {
        Self {
            total,
            completed,
            failed,
            in_progress: total - completed - failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.in_progress == 0
    }
}

/// Accept RFC 3339, or naive ISO-8601 interpreted as local time
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!OperationState::Initializing.is_terminal());
        assert!(!OperationState::Running.is_terminal());
        assert!(OperationState::Completed.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(OperationState::ExecutionError.is_terminal());
    }

    #[test]
    fn test_legacy_state_spellings() {
        let done: OperationState = serde_json::from_str("\"Successfully\"").unwrap();
        assert_eq!(done, OperationState::Completed);

        let err: OperationState = serde_json::from_str("\"Execution Error\"").unwrap();
        assert_eq!(err, OperationState::ExecutionError);
    }

    #[test]
    fn test_result_merge_overrides_present_fields() {
        let mut base = OperationResult::default()
            .with_exit_code(-1)
            .with_log_path("a.log");
        base.merge(OperationResult::default().with_exit_code(0));

        assert_eq!(base.exit_code, Some(0));
        assert_eq!(base.log_path.as_deref(), Some("a.log"));
        assert!(base.error.is_none());
    }

    #[test]
    fn test_result_keeps_unknown_keys() {
        let json = r#"{"exit_code": 3, "log_path": "x.log", "archive": "out.zip"}"#;
        let result: OperationResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.extra.get("archive").unwrap(), "out.zip");

        let back = serde_json::to_value(&result).unwrap();
        assert_eq!(back["archive"], "out.zip");
    }

    #[test]
    fn test_naive_timestamps_are_accepted() {
        let json = r#"{
            "status": "Successfully",
            "command": "echo hi",
            "start_time": "2024-03-01T10:15:30.123456",
            "end_time": "2024-03-01T10:15:31",
            "result": {"exit_code": 0, "log_path": "outputs/a/hi.log"}
        }"#;
        let op: OperationStatus = serde_json::from_str(json).unwrap();
        assert_eq!(op.status, OperationState::Completed);
        assert!(op.end_time.is_some());
        assert!(op.duration().unwrap() > chrono::Duration::zero());
    }

    #[test]
    fn test_summary_identity() {
        let summary = StatusSummary::from_counts(5, 2, 1);
        assert_eq!(summary.in_progress, 2);
        assert_eq!(
            summary.total,
            summary.completed + summary.failed + summary.in_progress
        );
        assert!(!summary.is_finished());
    }
}
