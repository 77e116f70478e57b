// Multi-step request workflows
// Each workflow returns a WorkflowResult, including partial data on failure

use crate::manager::RequestManager;
use crate::models::{
    FindRequestsQuery, RequestRow, RequestStatus, WorkflowResult, STATUS_FAILED, STATUS_SUCCEEDED,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Type name prefixes used when a workflow is not given any
pub const DEFAULT_TYPE_PREFIXES: [&str; 2] = ["SAT", "PSAT"];
pub const DEFAULT_DAYS_BACK: u32 = 7;

pub fn default_type_prefixes() -> Vec<String> {
    DEFAULT_TYPE_PREFIXES.iter().map(|s| s.to_string()).collect()
}

/// Step and payload bookkeeping for one workflow run
#[derive(Debug)]
pub struct WorkflowProgress {
    total_steps: u32,
    steps_completed: u32,
    data: Map<String, Value>,
}

impl WorkflowProgress {
    pub fn new(total_steps: u32) -> Self {
        Self {
            total_steps,
            steps_completed: 0,
            data: Map::new(),
        }
    }

    /// Store a value in the result payload
    pub fn record(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            warn!(key, error = %e, "Failed to serialize workflow data");
            Value::Null
        });
        self.data.insert(key.to_string(), value);
    }

    /// Mark the current step done; never exceeds the total
    pub fn complete_step(&mut self) {
        self.steps_completed = (self.steps_completed + 1).min(self.total_steps);
    }

    pub fn steps_completed(&self) -> u32 {
        self.steps_completed
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// 1-based number of the step currently running
    pub fn current_step(&self) -> u32 {
        (self.steps_completed + 1).min(self.total_steps)
    }

    pub fn finish(self, message: impl Into<String>) -> WorkflowResult {
        self.into_result(true, message.into())
    }

    /// Stop here, keeping whatever was recorded so far
    pub fn fail(self, message: impl Into<String>) -> WorkflowResult {
        self.into_result(false, message.into())
    }

    fn into_result(self, success: bool, message: String) -> WorkflowResult {
        WorkflowResult {
            success,
            message,
            data: self.data,
            steps_completed: self.steps_completed,
            total_steps: self.total_steps,
        }
    }
}

// ============================================================================
// Monitoring analysis
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub success: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: RequestStatus) {
        match status.code() {
            Some(STATUS_SUCCEEDED) => self.success += 1,
            Some(STATUS_FAILED) => self.failed += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRequest {
    pub request_id: i32,
    pub district_id: i32,
    pub type_name: String,
    pub request_time: Option<DateTime<Utc>>,
    pub request_time_eastern: Option<DateTime<Tz>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestAnalysis {
    pub by_status: StatusCounts,
    pub by_type: BTreeMap<String, StatusCounts>,
    pub by_district: BTreeMap<i32, StatusCounts>,
    pub failed_requests: Vec<FailedRequest>,
    pub districts_with_failures: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitoringSummary {
    pub healthy_districts: usize,
    pub districts_with_issues: usize,
    /// Type with the most failures; None when nothing failed
    pub most_problematic_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitoringReport {
    pub total_requests: usize,
    /// Percentage of succeeded requests, rounded to 2 decimals
    pub success_rate: f64,
    pub analysis: RequestAnalysis,
    pub summary: MonitoringSummary,
}

/// Success/failure breakdown of a set of requests
pub fn analyze_requests(requests: &[RequestRow]) -> MonitoringReport {
    let mut analysis = RequestAnalysis::default();
    let mut failing_districts = BTreeSet::new();

    for request in requests {
        analysis.by_status.add(request.status);
        analysis
            .by_type
            .entry(request.data_request_type_name.clone())
            .or_default()
            .add(request.status);
        analysis
            .by_district
            .entry(request.district_id)
            .or_default()
            .add(request.status);

        if request.status == RequestStatus::Failed {
            failing_districts.insert(request.district_id);
            analysis.failed_requests.push(FailedRequest {
                request_id: request.request_id,
                district_id: request.district_id,
                type_name: request.data_request_type_name.clone(),
                request_time: request.request_time,
                request_time_eastern: request.request_time_eastern,
            });
        }
    }
    analysis.districts_with_failures = failing_districts.into_iter().collect();

    let total_requests = requests.len();
    let success_rate = if total_requests == 0 {
        0.0
    } else {
        let rate = analysis.by_status.success as f64 / total_requests as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    };

    let mut most_problematic: Option<(&String, usize)> = None;
    for (name, counts) in &analysis.by_type {
        if counts.failed > 0 && most_problematic.map_or(true, |(_, max)| counts.failed > max) {
            most_problematic = Some((name, counts.failed));
        }
    }

    let summary = MonitoringSummary {
        healthy_districts: analysis
            .by_district
            .values()
            .filter(|c| c.failed == 0)
            .count(),
        districts_with_issues: analysis.districts_with_failures.len(),
        most_problematic_type: most_problematic.map(|(name, _)| name.clone()),
    };

    MonitoringReport {
        total_requests,
        success_rate,
        analysis,
        summary,
    }
}

// ============================================================================
// Workflows
// ============================================================================

#[derive(Debug, Serialize)]
struct RequestDetail<'a> {
    request_id: i32,
    district_id: i32,
    type_name: &'a str,
    status: Option<i32>,
}

/// Frequently used multi-step operations over the request manager
#[derive(Clone)]
pub struct CommonWorkflows {
    manager: RequestManager,
}

impl CommonWorkflows {
    pub fn new(manager: RequestManager) -> Self {
        Self { manager }
    }

    /// Find latest requests, optionally restore their files, then rerun them
    #[instrument(skip(self, type_prefixes))]
    pub async fn district_refresh(
        &self,
        district_ids: &[i32],
        type_prefixes: &[String],
        delete_checksums: bool,
        restore_files: bool,
    ) -> WorkflowResult {
        let mut progress = WorkflowProgress::new(if restore_files { 3 } else { 2 });

        info!(step = 1, "Finding latest requests");
        let query = FindRequestsQuery::for_districts(district_ids.to_vec())
            .with_type_names(type_prefixes.to_vec());
        let requests = match self.manager.find_requests(&query).await {
            Ok(requests) => requests,
            Err(e) => {
                let step = progress.current_step();
                return progress.fail(format!("Workflow failed at step {}: {}", step, e));
            }
        };

        if requests.is_empty() {
            progress.record("districts", district_ids);
            progress.record("requests_found", 0);
            return progress.fail("No requests found for the specified criteria");
        }

        let request_ids: Vec<i32> = requests.iter().map(|r| r.request_id).collect();
        progress.record("districts", district_ids);
        progress.record("requests_found", request_ids.len());
        progress.record("request_ids", &request_ids);
        progress.complete_step();
        info!(requests = request_ids.len(), "Found requests");

        if restore_files {
            info!(step = 2, "Restoring files");
            let report = self.manager.restore_files_batch(&request_ids, None).await;
            info!(
                restored = report.success_count,
                total = report.total,
                "Restore step finished"
            );
            progress.record("restore_results", &report);
            progress.complete_step();
        }

        info!(step = progress.current_step(), delete_checksums, "Rerunning requests");
        match self
            .manager
            .rerun_requests(&request_ids, delete_checksums, &[])
            .await
        {
            Ok(summary) => {
                progress.record("rerun_result", &summary);
                progress.complete_step();
            }
            Err(e) => {
                let step = progress.current_step();
                return progress.fail(format!("Workflow failed at step {}: {}", step, e));
            }
        }

        progress.finish(format!(
            "Successfully completed district refresh for {} districts",
            district_ids.len()
        ))
    }

    /// Find matching requests and download their files concurrently
    #[instrument(skip(self, type_prefixes, local_dir))]
    pub async fn bulk_file_download(
        &self,
        type_prefixes: &[String],
        district_ids: &[i32],
        local_dir: &Path,
        max_concurrent: Option<usize>,
    ) -> WorkflowResult {
        let mut progress = WorkflowProgress::new(2);

        let query = FindRequestsQuery::for_districts(district_ids.to_vec())
            .with_type_names(type_prefixes.to_vec());
        let requests = match self.manager.find_requests(&query).await {
            Ok(requests) => requests,
            Err(e) => return progress.fail(format!("Bulk download workflow failed: {}", e)),
        };

        if requests.is_empty() {
            progress.record("type_names", type_prefixes);
            progress.record("district_ids", district_ids);
            return progress.fail("No requests found for the specified criteria");
        }

        let request_ids: Vec<i32> = requests.iter().map(|r| r.request_id).collect();
        let details: Vec<RequestDetail<'_>> = requests
            .iter()
            .map(|r| RequestDetail {
                request_id: r.request_id,
                district_id: r.district_id,
                type_name: &r.data_request_type_name,
                status: r.status.code(),
            })
            .collect();
        progress.record("requests_found", request_ids.len());
        progress.record("request_details", &details);
        progress.complete_step();

        info!(requests = request_ids.len(), "Downloading files");
        let report = self
            .manager
            .download_files_batch(&request_ids, local_dir, max_concurrent)
            .await;
        let total_files = report.total_files();
        let successful = report.success_count;

        progress.record("download_results", &report);
        progress.record(
            "summary",
            serde_json::json!({
                "successful_requests": successful,
                "total_requests": request_ids.len(),
                "total_files_downloaded": total_files,
            }),
        );
        progress.complete_step();

        progress.finish(format!(
            "Downloaded {} files from {}/{} requests",
            total_files,
            successful,
            request_ids.len()
        ))
    }

    /// Success/failure report over the latest requests of the last `days_back` days
    #[instrument(skip(self, type_prefixes))]
    pub async fn integration_monitoring(
        &self,
        type_prefixes: &[String],
        days_back: u32,
    ) -> WorkflowResult {
        self.integration_monitoring_since(
            type_prefixes,
            days_back,
            Utc::now() - chrono::Duration::days(i64::from(days_back)),
        )
        .await
    }

    pub async fn integration_monitoring_since(
        &self,
        type_prefixes: &[String],
        days_back: u32,
        since: DateTime<Utc>,
    ) -> WorkflowResult {
        let mut progress = WorkflowProgress::new(1);
        progress.record("integration_types", type_prefixes);
        progress.record("days_back", days_back);

        let query = FindRequestsQuery::default()
            .with_type_names(type_prefixes.to_vec())
            .since(since);
        let requests = match self.manager.find_requests(&query).await {
            Ok(requests) => requests,
            Err(e) => return progress.fail(format!("Monitoring workflow failed: {}", e)),
        };

        if requests.is_empty() {
            progress.record("requests_found", 0);
            progress.complete_step();
            return progress.finish("No recent requests found for monitoring");
        }

        let report = analyze_requests(&requests);
        info!(
            total = report.total_requests,
            success_rate = report.success_rate,
            districts_with_issues = report.summary.districts_with_issues,
            "Monitoring analysis complete"
        );

        progress.record("requests_found", report.total_requests);
        progress.record("total_requests", report.total_requests);
        progress.record("success_rate", report.success_rate);
        progress.record("analysis", &report.analysis);
        progress.record("summary", &report.summary);
        progress.complete_step();

        progress.finish(format!(
            "Monitoring complete: {:.1}% success rate",
            report.success_rate
        ))
    }
}
