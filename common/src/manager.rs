// Request orchestrator
// Composes the data store and remote file gateways into per-request operations

use crate::batch::BatchExecutor;
use crate::config::{BatchConfig, Settings};
use crate::db::{self, RequestStore};
use crate::errors::{OperationError, RemoteFileError};
use crate::models::{
    BatchReport, ChecksumSelector, DataRequestType, DistrictRerunSummary, FindRequestsQuery,
    ItemOutcome, QueueSelector, RequestRow, RerunSummary, SkippedRequest,
};
use crate::remote::transfer::{self, RemoteLayout};
use crate::remote::{to_remote_path, RemoteConnector};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, instrument, warn};

/// Email previews older than this are removed before a new one is written
pub const PREVIEW_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of rendering a request's notification email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailPreview {
    pub request_id: i32,
    /// HTML file written for the email body, when the body is not empty
    pub html_path: Option<PathBuf>,
    pub attachment: Option<String>,
}

#[derive(Clone)]
pub struct RequestManager {
    store: Arc<dyn RequestStore>,
    connector: Arc<dyn RemoteConnector>,
    layout: RemoteLayout,
    batch: BatchConfig,
}

impl RequestManager {
    pub fn new(
        store: Arc<dyn RequestStore>,
        connector: Arc<dyn RemoteConnector>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            connector,
            layout: RemoteLayout::from(&settings.sftp),
            batch: settings.batch.clone(),
        }
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    pub async fn list_request_types(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<DataRequestType>, OperationError> {
        Ok(self
            .store
            .list_request_types(name_filter.map(str::to_string))
            .await?)
    }

    pub async fn find_requests(
        &self,
        query: &FindRequestsQuery,
    ) -> Result<Vec<RequestRow>, OperationError> {
        Ok(self.store.find_latest_requests(query).await?)
    }

    /// Write the stored notification email as `<dir>/email_req_<id>.html`
    ///
    /// Returns None when the request has no stored email.
    #[instrument(skip(self, dir))]
    pub async fn email_preview(
        &self,
        request_id: i32,
        dir: &Path,
    ) -> Result<Option<EmailPreview>, OperationError> {
        let Some(content) = self.store.email_content(request_id).await? else {
            debug!("No email content stored");
            return Ok(None);
        };

        let mut preview = EmailPreview {
            request_id,
            html_path: None,
            attachment: content.attachment,
        };
        if content.body.is_empty() {
            return Ok(Some(preview));
        }

        tokio::fs::create_dir_all(dir).await?;
        let removed = cleanup_expired_previews(dir, PREVIEW_MAX_AGE);
        if removed > 0 {
            info!(removed, "Removed expired email previews");
        }

        let html = format!(
            "<!doctype html><html><head><meta charset='utf-8'><title>EmailContent {}</title></head><body>{}</body></html>",
            request_id, content.body
        );
        let path = dir.join(format!("email_req_{}.html", request_id));
        tokio::fs::write(&path, html).await?;
        info!(path = %path.display(), "Wrote email preview");

        preview.html_path = Some(path);
        Ok(Some(preview))
    }

    /// Download one request's files into `<local_dir>/RequestID_<id>`
    #[instrument(skip(self, local_dir))]
    pub async fn download_files(
        &self,
        request_id: i32,
        local_dir: &Path,
    ) -> Result<ItemOutcome, OperationError> {
        let connector = Arc::clone(&self.connector);
        let layout = self.layout.clone();
        let local_dir = local_dir.to_path_buf();
        let temp_dir = self.batch.temp_dir.clone();

        let outcome = tokio::task::spawn_blocking(move || -> Result<ItemOutcome, RemoteFileError> {
            let remote = connector.connect()?;
            Ok(transfer::download_request_files(
                remote.as_ref(),
                &layout,
                request_id,
                &local_dir,
                &temp_dir,
            ))
        })
        .await??;
        Ok(outcome)
    }

    /// Put one request's files back into its district upload directory
    #[instrument(skip(self))]
    pub async fn restore_files(&self, request_id: i32) -> Result<ItemOutcome, OperationError> {
        let Some(db_path) = db::directory_path_for_request(self.store.as_ref(), request_id).await?
        else {
            warn!("Could not determine DirectoryPath");
            return Ok(ItemOutcome::failed(format!(
                "Could not determine DirectoryPath for request {}",
                request_id
            )));
        };
        let target_dir = to_remote_path(&db_path);

        let connector = Arc::clone(&self.connector);
        let layout = self.layout.clone();
        let temp_dir = self.batch.temp_dir.clone();
        let remote_target = target_dir.clone();

        let outcome = tokio::task::spawn_blocking(move || -> Result<ItemOutcome, RemoteFileError> {
            let remote = connector.connect()?;
            Ok(transfer::restore_request_files(
                remote.as_ref(),
                &layout,
                request_id,
                &remote_target,
                &temp_dir,
            ))
        })
        .await??;
        Ok(outcome.at(target_dir))
    }

    /// Clear checksums (optionally) and bump the queue for the given requests
    ///
    /// Requests that cannot be found or have no resolvable directory are skipped.
    /// Nothing is mutated when no request resolves.
    #[instrument(skip(self, request_ids, checksum_keys), fields(requests = request_ids.len()))]
    pub async fn rerun_requests(
        &self,
        request_ids: &[i32],
        delete_checksums: bool,
        checksum_keys: &[String],
    ) -> Result<RerunSummary, OperationError> {
        let mut summary = RerunSummary::default();
        let mut districts = BTreeSet::new();
        let mut paths = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for &request_id in request_ids {
            if !seen.insert(request_id) {
                continue;
            }
            let Some(record) = self.store.find_request(request_id).await? else {
                warn!(request_id, "Skipping: request not found");
                summary.skipped.push(SkippedRequest {
                    request_id,
                    reason: "Request not found".to_string(),
                });
                continue;
            };
            let Some(path) = db::resolve_directory_path(self.store.as_ref(), &record).await? else {
                warn!(request_id, "Skipping: missing DirectoryPath");
                summary.skipped.push(SkippedRequest {
                    request_id,
                    reason: "Missing DirectoryPath".to_string(),
                });
                continue;
            };
            districts.insert(record.district_id);
            paths.insert(path);
            summary.request_ids.push(request_id);
        }

        if districts.is_empty() {
            warn!("No resolvable requests, nothing to rerun");
            return Ok(summary);
        }

        if delete_checksums {
            let selector = ChecksumSelector {
                district_ids: districts.clone(),
                directory_paths: paths.clone(),
                keys: checksum_keys.iter().cloned().collect(),
            };
            summary.checksums_deleted = self.store.clear_checksums(&selector).await?;
        }

        let selector = QueueSelector {
            district_ids: districts,
            directory_paths: paths,
        };
        summary.queues_updated = self.store.bump_latest_queue(&selector).await?;

        info!(
            rerun = summary.request_ids.len(),
            skipped = summary.skipped.len(),
            checksums_deleted = summary.checksums_deleted,
            queues_updated = summary.queues_updated,
            "Rerun triggered"
        );
        Ok(summary)
    }

    /// Download many requests concurrently; defaults to the configured limit
    pub async fn download_files_batch(
        &self,
        request_ids: &[i32],
        local_dir: &Path,
        max_concurrent: Option<usize>,
    ) -> BatchReport {
        let executor =
            BatchExecutor::new(max_concurrent.unwrap_or(self.batch.download_concurrency));
        let manager = self.clone();
        let local_dir = local_dir.to_path_buf();
        executor
            .run(request_ids, move |request_id| {
                let manager = manager.clone();
                let local_dir = local_dir.clone();
                async move { manager.download_files(request_id, &local_dir).await }
            })
            .await
    }

    /// Restore many requests concurrently; defaults to the configured limit
    pub async fn restore_files_batch(
        &self,
        request_ids: &[i32],
        max_concurrent: Option<usize>,
    ) -> BatchReport {
        let executor = BatchExecutor::new(max_concurrent.unwrap_or(self.batch.restore_concurrency));
        let manager = self.clone();
        executor
            .run(request_ids, move |request_id| {
                let manager = manager.clone();
                async move { manager.restore_files(request_id).await }
            })
            .await
    }

    /// Find the latest requests of the districts and rerun them all
    #[instrument(skip(self, type_prefixes, checksum_keys))]
    pub async fn batch_rerun_by_district(
        &self,
        district_ids: &[i32],
        type_prefixes: &[String],
        delete_checksums: bool,
        checksum_keys: &[String],
    ) -> Result<DistrictRerunSummary, OperationError> {
        let query = FindRequestsQuery::for_districts(district_ids.to_vec())
            .with_type_names(type_prefixes.to_vec());
        let requests = self.find_requests(&query).await?;

        let mut summary = DistrictRerunSummary {
            districts: district_ids.to_vec(),
            requests_found: requests.len(),
            rerun: RerunSummary::default(),
        };
        if requests.is_empty() {
            info!("No requests found for districts");
            return Ok(summary);
        }

        let ids: Vec<i32> = requests.iter().map(|r| r.request_id).collect();
        summary.rerun = self
            .rerun_requests(&ids, delete_checksums, checksum_keys)
            .await?;
        Ok(summary)
    }
}

/// Remove `*_req_*.html` previews in `dir` older than `max_age`; returns the count removed
pub fn cleanup_expired_previews(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.contains("_req_") && name.ends_with(".html")
        })
        .filter(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map_or(false, |age| age > max_age)
        })
        .filter(|entry| match std::fs::remove_file(entry.path()) {
            Ok(()) => true,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Failed to remove preview");
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockRequestStore;
    use crate::models::{EmailContent, RequestRecord};
    use crate::remote::MemoryRemote;
    use mockall::predicate::eq;

    fn manager(store: MockRequestStore, remote: &MemoryRemote, temp: &Path) -> RequestManager {
        let mut settings = Settings::default();
        settings.batch.temp_dir = temp.to_path_buf();
        RequestManager::new(Arc::new(store), Arc::new(remote.clone()), &settings)
    }

    fn record(request_id: i32, district_id: i32, path: Option<&str>) -> RequestRecord {
        RequestRecord {
            request_id,
            district_id,
            imported_file_name: path.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_rerun_skips_unresolvable_requests() {
        let mut store = MockRequestStore::new();
        store.expect_find_request().returning(|id| match id {
            1 => Ok(Some(record(1, 10, Some(r"F:\FTProot\Districts\10")))),
            2 => Ok(Some(record(2, 20, None))),
            _ => Ok(None),
        });
        store
            .expect_upload_directory_for_district()
            .with(eq(20))
            .returning(|_| Ok(None));
        store
            .expect_clear_checksums()
            .withf(|s| {
                s.district_ids == BTreeSet::from([10])
                    && s.keys == BTreeSet::from(["roster".to_string()])
            })
            .times(1)
            .returning(|_| Ok(3));
        store
            .expect_bump_latest_queue()
            .withf(|s| {
                s.district_ids == BTreeSet::from([10])
                    && s.directory_paths == BTreeSet::from([r"F:\FTProot\Districts\10".to_string()])
            })
            .times(1)
            .returning(|_| Ok(1));

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(store, &MemoryRemote::new(), temp.path());
        let summary = manager
            .rerun_requests(&[1, 2, 3, 1], true, &["roster".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.request_ids, vec![1]);
        assert_eq!(summary.skipped.len(), 2);
        assert_eq!(summary.skipped[0].reason, "Missing DirectoryPath");
        assert_eq!(summary.skipped[1].reason, "Request not found");
        assert_eq!(summary.checksums_deleted, 3);
        assert_eq!(summary.queues_updated, 1);
    }

    #[tokio::test]
    async fn test_rerun_without_resolvable_requests_mutates_nothing() {
        let mut store = MockRequestStore::new();
        store.expect_find_request().returning(|_| Ok(None));
        store.expect_clear_checksums().never();
        store.expect_bump_latest_queue().never();

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(store, &MemoryRemote::new(), temp.path());
        let summary = manager.rerun_requests(&[5, 6], true, &[]).await.unwrap();
        assert!(summary.request_ids.is_empty());
        assert_eq!(summary.queues_updated, 0);
    }

    #[tokio::test]
    async fn test_restore_files_targets_resolved_directory() {
        let mut store = MockRequestStore::new();
        store
            .expect_find_request()
            .returning(|id| Ok(Some(record(id, 7, Some(r"F:\FTProot\Districts\7\SAT")))));

        let remote = MemoryRemote::new();
        remote.add_dir("LinkIt/BackupData/ETLProcessedFolder/001");
        remote.add_file("LinkIt/ETLProcessedFolder/001/42_run/scores.csv", "1,2");

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(store, &remote, temp.path());
        let outcome = manager.restore_files(42).await.unwrap();

        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.local_path, Some(PathBuf::from("/Districts/7/SAT")));
        assert_eq!(
            remote.read("/Districts/7/SAT/scores.csv"),
            Some(b"1,2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_restore_without_directory_does_not_connect() {
        let mut store = MockRequestStore::new();
        store.expect_find_request().returning(|_| Ok(None));

        let remote = MemoryRemote::new();
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(store, &remote, temp.path());
        let outcome = manager.restore_files(1).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(remote.connections(), 0);
    }

    #[tokio::test]
    async fn test_download_batch_opens_a_session_per_request() {
        let remote = MemoryRemote::new();
        remote.add_file("LinkIt/ETLProcessedFolder/001/1/a.csv", "a");
        remote.add_file("LinkIt/ETLProcessedFolder/001/2/b.csv", "b");
        remote.add_dir("LinkIt/BackupData/ETLProcessedFolder/001");

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(MockRequestStore::new(), &remote, temp.path());
        let report = manager
            .download_files_batch(&[1, 2, 3], temp.path(), Some(2))
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.total_files(), 2);
        assert!(!report.results[&3].success);
        assert_eq!(remote.connections(), 3);
    }

    #[tokio::test]
    async fn test_connection_failures_are_recorded_per_item() {
        let remote = MemoryRemote::new();
        remote.refuse_connections();

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(MockRequestStore::new(), &remote, temp.path());
        let report = manager.download_files_batch(&[1, 2], temp.path(), None).await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.results[&1].message, "SFTP connection failed: connection refused");
    }

    #[tokio::test]
    async fn test_email_preview_writes_html_and_sweeps_old_files() {
        let mut store = MockRequestStore::new();
        store.expect_email_content().with(eq(9)).returning(|_| {
            Ok(Some(EmailContent {
                body: "<p>Import failed</p>".to_string(),
                attachment: Some("errors.csv".to_string()),
            }))
        });

        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join("email_req_1.html");
        std::fs::write(&stale, "old").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(25 * 60 * 60))
            .unwrap();
        let unrelated = temp.path().join("notes.html");
        std::fs::write(&unrelated, "keep").unwrap();

        let manager = manager(store, &MemoryRemote::new(), temp.path());
        let preview = manager.email_preview(9, temp.path()).await.unwrap().unwrap();

        let path = preview.html_path.unwrap();
        assert_eq!(path, temp.path().join("email_req_9.html"));
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("<title>EmailContent 9</title>"));
        assert!(html.contains("<body><p>Import failed</p></body>"));
        assert_eq!(preview.attachment.as_deref(), Some("errors.csv"));
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_email_preview_missing_content() {
        let mut store = MockRequestStore::new();
        store.expect_email_content().returning(|_| Ok(None));

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(store, &MemoryRemote::new(), temp.path());
        assert!(manager.email_preview(1, temp.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_district_rerun_with_no_requests() {
        let mut store = MockRequestStore::new();
        store
            .expect_find_latest_requests()
            .withf(|q| q.district_ids == vec![3, 4] && q.type_name_prefixes == vec!["SAT".to_string()])
            .returning(|_| Ok(Vec::new()));
        store.expect_bump_latest_queue().never();

        let temp = tempfile::tempdir().unwrap();
        let manager = manager(store, &MemoryRemote::new(), temp.path());
        let summary = manager
            .batch_rerun_by_district(&[3, 4], &["SAT".to_string()], true, &[])
            .await
            .unwrap();

        assert_eq!(summary.requests_found, 0);
        assert_eq!(summary.districts, vec![3, 4]);
        assert_eq!(summary.rerun, RerunSummary::default());
    }
}
