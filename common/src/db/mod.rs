// Data store gateway
// RequestStore is the seam between the orchestrator and SQL Server

pub mod queries;
pub mod sql_server;

pub use sql_server::SqlServerStore;

use crate::errors::DatabaseError;
use crate::models::{
    ChecksumSelector, DataRequestType, EmailContent, FindRequestsQuery, QueueSelector,
    RequestRecord, RequestRow,
};
use async_trait::async_trait;

/// Read and trigger operations against the platform's request tables
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Request types, optionally filtered by a case-insensitive substring, ordered by name
    async fn list_request_types(
        &self,
        name_filter: Option<String>,
    ) -> Result<Vec<DataRequestType>, DatabaseError>;

    /// Latest request per (district, type) pair matching the query, newest first
    async fn find_latest_requests(
        &self,
        query: &FindRequestsQuery,
    ) -> Result<Vec<RequestRow>, DatabaseError>;

    async fn email_content(&self, request_id: i32)
        -> Result<Option<EmailContent>, DatabaseError>;

    async fn find_request(&self, request_id: i32) -> Result<Option<RequestRecord>, DatabaseError>;

    /// Upload directory configured for a district, if any
    async fn upload_directory_for_district(
        &self,
        district_id: i32,
    ) -> Result<Option<String>, DatabaseError>;

    /// Delete checksum markers; returns rows affected
    async fn clear_checksums(&self, selector: &ChecksumSelector) -> Result<u64, DatabaseError>;

    /// Set the latest queue entry per district back to pending; returns rows affected
    async fn bump_latest_queue(&self, selector: &QueueSelector) -> Result<u64, DatabaseError>;
}

/// Directory a request was imported from: its own file name, else the district upload path
pub async fn resolve_directory_path(
    store: &dyn RequestStore,
    record: &RequestRecord,
) -> Result<Option<String>, DatabaseError> {
    if let Some(path) = record
        .imported_file_name
        .as_ref()
        .filter(|p| !p.trim().is_empty())
    {
        return Ok(Some(path.clone()));
    }
    store.upload_directory_for_district(record.district_id).await
}

/// Look up a request and resolve its directory path in one go
pub async fn directory_path_for_request(
    store: &dyn RequestStore,
    request_id: i32,
) -> Result<Option<String>, DatabaseError> {
    match store.find_request(request_id).await? {
        Some(record) => resolve_directory_path(store, &record).await,
        None => Ok(None),
    }
}
