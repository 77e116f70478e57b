use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// ============================================================================
// Request Models
// ============================================================================

/// Status code stored on a platform request row
pub const STATUS_FAILED: i32 = 4;
pub const STATUS_SUCCEEDED: i32 = 5;

/// Outcome recorded by the platform for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Failed,
    Succeeded,
    Other(i32),
    Unknown,
}

impl RequestStatus {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(STATUS_FAILED) => RequestStatus::Failed,
            Some(STATUS_SUCCEEDED) => RequestStatus::Succeeded,
            Some(other) => RequestStatus::Other(other),
            None => RequestStatus::Unknown,
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            RequestStatus::Failed => Some(STATUS_FAILED),
            RequestStatus::Succeeded => Some(STATUS_SUCCEEDED),
            RequestStatus::Other(code) => Some(*code),
            RequestStatus::Unknown => None,
        }
    }
}

/// Latest request for a district/type pair, joined with its type name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRow {
    pub request_id: i32,
    pub district_id: i32,
    pub data_request_type_id: i32,
    pub data_request_type_name: String,
    pub imported_file_name: Option<String>,
    pub status: RequestStatus,
    pub request_time: Option<DateTime<Utc>>,
    pub request_time_eastern: Option<DateTime<Tz>>,
}

impl RequestRow {
    /// Build a row from raw column values; naive timestamps are stored in UTC
    pub fn new(
        request_id: i32,
        district_id: i32,
        data_request_type_id: i32,
        data_request_type_name: Option<String>,
        imported_file_name: Option<String>,
        status: Option<i32>,
        request_time: Option<NaiveDateTime>,
    ) -> Self {
        let request_time = request_time.map(|t| Utc.from_utc_datetime(&t));
        Self {
            request_id,
            district_id,
            data_request_type_id,
            data_request_type_name: data_request_type_name.unwrap_or_default(),
            imported_file_name,
            status: RequestStatus::from_code(status),
            request_time,
            request_time_eastern: request_time.map(to_eastern),
        }
    }
}

/// Convert a UTC timestamp to US Eastern time (EST/EDT aware)
pub fn to_eastern(utc: DateTime<Utc>) -> DateTime<Tz> {
    utc.with_timezone(&chrono_tz::US::Eastern)
}

/// Lookup entry mapping a request type id to its name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequestType {
    pub id: i32,
    pub name: Option<String>,
}

/// Minimal request record needed to target a rerun
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: i32,
    pub district_id: i32,
    pub imported_file_name: Option<String>,
}

/// Stored notification email for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    pub body: String,
    pub attachment: Option<String>,
}

/// Filters for finding the latest request per district/type pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRequestsQuery {
    pub type_ids: Vec<i32>,
    pub type_name_prefixes: Vec<String>,
    pub district_ids: Vec<i32>,
    pub statuses: Vec<i32>,
    pub since: Option<DateTime<Utc>>,
}

impl Default for FindRequestsQuery {
    fn default() -> Self {
        Self {
            type_ids: Vec::new(),
            type_name_prefixes: Vec::new(),
            district_ids: Vec::new(),
            statuses: vec![STATUS_FAILED, STATUS_SUCCEEDED],
            since: None,
        }
    }
}

impl FindRequestsQuery {
    pub fn for_districts(district_ids: Vec<i32>) -> Self {
        Self {
            district_ids,
            ..Self::default()
        }
    }

    pub fn with_type_names(mut self, prefixes: Vec<String>) -> Self {
        self.type_name_prefixes = prefixes;
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

// ============================================================================
// Cache / Queue Selectors
// ============================================================================

/// Selects `UploadFileIntegrationChecksum` markers to delete
///
/// Entries are keyed by district, upload directory and checksum key; only
/// districts are mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumSelector {
    pub district_ids: BTreeSet<i32>,
    pub directory_paths: BTreeSet<String>,
    pub keys: BTreeSet<String>,
}

/// Selects the latest `xpsQueue` entry per district to bump back to pending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSelector {
    pub district_ids: BTreeSet<i32>,
    pub directory_paths: BTreeSet<String>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a per-request file operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub success: bool,
    pub files: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl ItemOutcome {
    pub fn succeeded(files: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            files,
            message: message.into(),
            local_path: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            files: 0,
            message: message.into(),
            local_path: None,
        }
    }

    /// Partial result: some files went through, others did not
    pub fn with_errors(files: usize, errors: &[String]) -> Self {
        Self {
            success: false,
            files,
            message: format!("Completed with errors: {}", errors.join("; ")),
            local_path: None,
        }
    }

    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}

/// Per-id results of a bounded batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: BTreeMap<i32, ItemOutcome>,
    pub success_count: usize,
    pub total: usize,
}

impl BatchReport {
    pub fn total_files(&self) -> usize {
        self.results.values().map(|r| r.files).sum()
    }
}

/// A request id left out of a rerun, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRequest {
    pub request_id: i32,
    pub reason: String,
}

/// Result of re-triggering processing for a set of requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerunSummary {
    pub request_ids: Vec<i32>,
    pub skipped: Vec<SkippedRequest>,
    pub checksums_deleted: u64,
    pub queues_updated: u64,
}

/// Result of a district-wide rerun
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictRerunSummary {
    pub districts: Vec<i32>,
    pub requests_found: usize,
    #[serde(flatten)]
    pub rerun: RerunSummary,
}

// ============================================================================
// Workflow Models
// ============================================================================

/// Outcome of a multi-step workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub message: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub steps_completed: u32,
    pub total_steps: u32,
}

impl WorkflowResult {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn test_status_codes_round_trip() {
        assert_eq!(RequestStatus::from_code(Some(4)), RequestStatus::Failed);
        assert_eq!(RequestStatus::from_code(Some(5)), RequestStatus::Succeeded);
        assert_eq!(RequestStatus::from_code(Some(1)), RequestStatus::Other(1));
        assert_eq!(RequestStatus::from_code(None), RequestStatus::Unknown);
        assert_eq!(RequestStatus::Failed.code(), Some(4));
    }

    #[test]
    fn test_request_row_converts_to_eastern() {
        // January: EST is UTC-5
        let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(17, 0, 0)
            .unwrap();
        let row = RequestRow::new(1, 2, 3, Some("SAT".into()), None, Some(5), Some(naive));
        assert_eq!(row.request_time_eastern.unwrap().hour(), 12);

        // July: EDT is UTC-4
        let naive = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(17, 0, 0)
            .unwrap();
        let row = RequestRow::new(1, 2, 3, None, None, None, Some(naive));
        assert_eq!(row.request_time_eastern.unwrap().hour(), 13);
        assert_eq!(row.data_request_type_name, "");
        assert_eq!(row.status, RequestStatus::Unknown);
    }

    #[test]
    fn test_default_query_targets_failed_and_succeeded() {
        let query = FindRequestsQuery::for_districts(vec![10]);
        assert_eq!(query.statuses, vec![STATUS_FAILED, STATUS_SUCCEEDED]);
        assert_eq!(query.district_ids, vec![10]);
    }

    #[test]
    fn test_partial_outcome_message() {
        let outcome = ItemOutcome::with_errors(2, &["a failed".into(), "b failed".into()]);
        assert!(!outcome.success);
        assert_eq!(outcome.files, 2);
        assert_eq!(outcome.message, "Completed with errors: a failed; b failed");
    }
}
