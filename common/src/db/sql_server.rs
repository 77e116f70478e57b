// SQL Server implementation of RequestStore over tiberius
// One connection is opened lazily and reused; it is dropped after a connection-class
// or transaction-state error

use super::queries::{self, ParamQuery, SqlParam};
use super::RequestStore;
use crate::config::DatabaseConfig;
use crate::credentials::CredentialManager;
use crate::errors::DatabaseError;
use crate::models::{
    ChecksumSelector, DataRequestType, EmailContent, FindRequestsQuery, QueueSelector,
    RequestRecord, RequestRow,
};
use crate::retry::{retry_async, ExponentialBackoff};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, instrument, warn};

type SqlClient = Client<Compat<TcpStream>>;

pub struct SqlServerStore {
    config: DatabaseConfig,
    credentials: Arc<CredentialManager>,
    retry: ExponentialBackoff,
    client: Mutex<Option<SqlClient>>,
}

impl SqlServerStore {
    pub fn new(
        config: DatabaseConfig,
        credentials: Arc<CredentialManager>,
        retry: ExponentialBackoff,
    ) -> Self {
        Self {
            config,
            credentials,
            retry,
            client: Mutex::new(None),
        }
    }

    #[instrument(skip(self), fields(host = %self.config.host, database = %self.config.name))]
    async fn connect(&self) -> Result<SqlClient, DatabaseError> {
        let creds = self
            .credentials
            .db_credentials()
            .map_err(|e| DatabaseError::AuthenticationFailed(e.to_string()))?;

        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.name);
        config.authentication(AuthMethod::sql_server(&creds.username, &creds.password));
        if self.config.trust_cert {
            config.trust_cert();
        }

        let timeout = Duration::from_secs(self.config.connect_timeout_seconds);
        let client = retry_async(
            &self.retry,
            "sql_server_connect",
            DatabaseError::is_retryable,
            || {
                let config = config.clone();
                async move {
                    let tcp = tokio::time::timeout(timeout, TcpStream::connect(config.get_addr()))
                        .await
                        .map_err(|_| {
                            DatabaseError::ConnectionFailed(format!(
                                "connect timed out after {}s",
                                timeout.as_secs()
                            ))
                        })?
                        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
                    tcp.set_nodelay(true)
                        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
                    let client = Client::connect(config, tcp.compat_write()).await?;
                    Ok::<_, DatabaseError>(client)
                }
            },
        )
        .await?;

        info!("Connected to SQL Server");
        Ok(client)
    }

    /// Run a read query and collect the first result set
    async fn fetch(&self, query: ParamQuery) -> Result<Vec<Row>, DatabaseError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(DatabaseError::ConnectionFailed("no connection".to_string()));
        };

        debug!(params = query.params.len(), "Executing query");
        let result = async {
            let stream = build_query(&query).query(client).await?;
            let rows = stream.into_first_result().await?;
            Ok::<_, DatabaseError>(rows)
        }
        .await;

        discard_on_connection_error(&mut guard, result)
    }

    /// Run a mutation inside an explicit transaction; returns rows affected
    async fn execute_in_transaction(&self, query: ParamQuery) -> Result<u64, DatabaseError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(DatabaseError::ConnectionFailed("no connection".to_string()));
        };

        let result = run_in_transaction(client, &query).await;
        discard_on_connection_error(&mut guard, result)
    }

    /// Type ids to filter on. None means the query can match nothing.
    async fn effective_type_ids(
        &self,
        query: &FindRequestsQuery,
    ) -> Result<Option<Vec<i32>>, DatabaseError> {
        let mut type_ids = query.type_ids.clone();
        if let Some(prefix_query) = queries::type_ids_for_prefixes(&query.type_name_prefixes) {
            let rows = self.fetch(prefix_query).await?;
            let resolved = rows
                .iter()
                .map(|row| required_i32(row, 0))
                .collect::<Result<Vec<_>, _>>()?;
            if resolved.is_empty() && type_ids.is_empty() {
                debug!(prefixes = ?query.type_name_prefixes, "No request types match prefixes");
                return Ok(None);
            }
            type_ids.extend(resolved);
        }
        type_ids.sort_unstable();
        type_ids.dedup();
        Ok(Some(type_ids))
    }
}

const BEGIN_TRAN: &str = "BEGIN TRAN";
const COMMIT_TRAN: &str = "COMMIT";
const ROLLBACK_TRAN: &str = "IF @@TRANCOUNT > 0 ROLLBACK";

/// The two statement kinds a transaction needs from a connection
///
/// Transaction control goes through a plain SQL batch; `Client::execute`
/// wraps statements in `sp_executesql`, and SQL Server rejects an RPC that
/// leaves `@@TRANCOUNT` different from how it found it.
#[async_trait]
trait TransactionSession: Send {
    async fn batch(&mut self, sql: &str) -> Result<(), DatabaseError>;

    async fn mutate(&mut self, query: &ParamQuery) -> Result<u64, DatabaseError>;
}

#[async_trait]
impl TransactionSession for SqlClient {
    async fn batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn mutate(&mut self, query: &ParamQuery) -> Result<u64, DatabaseError> {
        let outcome = build_query(query).execute(self).await?;
        Ok(outcome.total())
    }
}

/// BEGIN, mutate, then COMMIT; roll back when the mutation fails
///
/// Failures that leave the transaction state unknown (BEGIN, COMMIT or the
/// rollback itself) come back as `TransactionFailed`.
async fn run_in_transaction<S: TransactionSession + ?Sized>(
    session: &mut S,
    query: &ParamQuery,
) -> Result<u64, DatabaseError> {
    session
        .batch(BEGIN_TRAN)
        .await
        .map_err(|e| DatabaseError::TransactionFailed(format!("BEGIN TRAN failed: {}", e)))?;

    match session.mutate(query).await {
        Ok(rows) => {
            session
                .batch(COMMIT_TRAN)
                .await
                .map_err(|e| DatabaseError::TransactionFailed(format!("COMMIT failed: {}", e)))?;
            Ok(rows)
        }
        Err(e) => {
            warn!(error = %e, "Mutation failed, rolling back");
            if let Err(rollback) = session.batch(ROLLBACK_TRAN).await {
                warn!(error = %rollback, "Rollback failed");
                return Err(DatabaseError::TransactionFailed(format!(
                    "{}; rollback failed: {}",
                    e, rollback
                )));
            }
            Err(e)
        }
    }
}

fn build_query(query: &ParamQuery) -> Query<'_> {
    let mut q = Query::new(query.sql.as_str());
    for param in &query.params {
        match param {
            SqlParam::Int(v) => q.bind(*v),
            SqlParam::Text(v) => q.bind(v.as_str()),
            SqlParam::DateTime(v) => q.bind(*v),
        }
    }
    q
}

fn discard_on_connection_error<T>(
    guard: &mut Option<SqlClient>,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    if let Err(e) = &result {
        // A failed COMMIT or ROLLBACK may leave a transaction open on the session
        if e.is_retryable() || matches!(e, DatabaseError::TransactionFailed(_)) {
            warn!(error = %e, "Discarding broken SQL Server connection");
            *guard = None;
        }
    }
    result
}

fn required_i32(row: &Row, idx: usize) -> Result<i32, DatabaseError> {
    row.try_get::<i32, _>(idx)?
        .ok_or_else(|| DatabaseError::QueryFailed(format!("column {} is NULL", idx)))
}

fn optional_string(row: &Row, idx: usize) -> Result<Option<String>, DatabaseError> {
    Ok(row.try_get::<&str, _>(idx)?.map(str::to_string))
}

#[async_trait]
impl RequestStore for SqlServerStore {
    #[instrument(skip(self))]
    async fn list_request_types(
        &self,
        name_filter: Option<String>,
    ) -> Result<Vec<DataRequestType>, DatabaseError> {
        let rows = self
            .fetch(queries::list_request_types(name_filter.as_deref()))
            .await?;
        rows.iter()
            .map(|row| {
                Ok(DataRequestType {
                    id: required_i32(row, 0)?,
                    name: optional_string(row, 1)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, query), fields(districts = query.district_ids.len()))]
    async fn find_latest_requests(
        &self,
        query: &FindRequestsQuery,
    ) -> Result<Vec<RequestRow>, DatabaseError> {
        let Some(type_ids) = self.effective_type_ids(query).await? else {
            return Ok(Vec::new());
        };

        let rows = self
            .fetch(queries::find_latest_requests(query, &type_ids))
            .await?;
        let requests = rows
            .iter()
            .map(|row| {
                Ok(RequestRow::new(
                    required_i32(row, 0)?,
                    required_i32(row, 1)?,
                    required_i32(row, 2)?,
                    optional_string(row, 3)?,
                    optional_string(row, 4)?,
                    row.try_get::<i32, _>(5)?,
                    row.try_get::<chrono::NaiveDateTime, _>(6)?,
                ))
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        debug!(count = requests.len(), "Found latest requests");
        Ok(requests)
    }

    #[instrument(skip(self))]
    async fn email_content(
        &self,
        request_id: i32,
    ) -> Result<Option<EmailContent>, DatabaseError> {
        let rows = self.fetch(queries::email_content(request_id)).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(EmailContent {
            body: optional_string(row, 0)?.unwrap_or_default(),
            attachment: optional_string(row, 1)?,
        }))
    }

    #[instrument(skip(self))]
    async fn find_request(&self, request_id: i32) -> Result<Option<RequestRecord>, DatabaseError> {
        let rows = self.fetch(queries::find_request(request_id)).await?;
        rows.first()
            .map(|row| {
                Ok(RequestRecord {
                    request_id: required_i32(row, 0)?,
                    district_id: required_i32(row, 1)?,
                    imported_file_name: optional_string(row, 2)?,
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn upload_directory_for_district(
        &self,
        district_id: i32,
    ) -> Result<Option<String>, DatabaseError> {
        let rows = self
            .fetch(queries::upload_directory_for_district(district_id))
            .await?;
        match rows.first() {
            Some(row) => optional_string(row, 0),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, selector), fields(districts = ?selector.district_ids))]
    async fn clear_checksums(&self, selector: &ChecksumSelector) -> Result<u64, DatabaseError> {
        let deleted = self
            .execute_in_transaction(queries::clear_checksums(selector)?)
            .await?;
        info!(deleted, "Cleared integration checksums");
        Ok(deleted)
    }

    #[instrument(skip(self, selector), fields(districts = ?selector.district_ids))]
    async fn bump_latest_queue(&self, selector: &QueueSelector) -> Result<u64, DatabaseError> {
        let updated = self
            .execute_in_transaction(queries::bump_latest_queue(selector)?)
            .await?;
        info!(updated, "Bumped latest queue entries");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every statement and fails the ones it is told to
    #[derive(Default)]
    struct RecordingSession {
        statements: Vec<String>,
        fail_batch: Option<&'static str>,
        fail_mutation: bool,
    }

    #[async_trait]
    impl TransactionSession for RecordingSession {
        async fn batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
            self.statements.push(sql.to_string());
            if self.fail_batch == Some(sql) {
                return Err(DatabaseError::QueryFailed(format!("{} rejected", sql)));
            }
            Ok(())
        }

        async fn mutate(&mut self, query: &ParamQuery) -> Result<u64, DatabaseError> {
            self.statements.push(query.sql.clone());
            if self.fail_mutation {
                return Err(DatabaseError::QueryFailed("constraint violation".to_string()));
            }
            Ok(3)
        }
    }

    fn mutation() -> ParamQuery {
        ParamQuery {
            sql: "UPDATE q SET x = 1".to_string(),
            params: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_transaction_commits_after_mutation() {
        let mut session = RecordingSession::default();
        let rows = run_in_transaction(&mut session, &mutation()).await.unwrap();

        assert_eq!(rows, 3);
        assert_eq!(
            session.statements,
            vec!["BEGIN TRAN", "UPDATE q SET x = 1", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back() {
        let mut session = RecordingSession {
            fail_mutation: true,
            ..Default::default()
        };
        let err = run_in_transaction(&mut session, &mutation()).await.unwrap_err();

        assert!(matches!(err, DatabaseError::QueryFailed(_)));
        assert_eq!(
            session.statements,
            vec!["BEGIN TRAN", "UPDATE q SET x = 1", "IF @@TRANCOUNT > 0 ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_is_a_transaction_failure() {
        let mut session = RecordingSession {
            fail_batch: Some(COMMIT_TRAN),
            ..Default::default()
        };
        let err = run_in_transaction(&mut session, &mutation()).await.unwrap_err();

        assert!(matches!(err, DatabaseError::TransactionFailed(_)));
        assert_eq!(session.statements.last().map(String::as_str), Some("COMMIT"));
    }

    #[tokio::test]
    async fn test_failed_begin_skips_mutation() {
        let mut session = RecordingSession {
            fail_batch: Some(BEGIN_TRAN),
            ..Default::default()
        };
        let err = run_in_transaction(&mut session, &mutation()).await.unwrap_err();

        assert!(matches!(err, DatabaseError::TransactionFailed(_)));
        assert_eq!(session.statements, vec!["BEGIN TRAN"]);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_a_transaction_failure() {
        let mut session = RecordingSession {
            fail_batch: Some(ROLLBACK_TRAN),
            fail_mutation: true,
            ..Default::default()
        };
        let err = run_in_transaction(&mut session, &mutation()).await.unwrap_err();

        match err {
            DatabaseError::TransactionFailed(message) => {
                assert!(message.contains("rollback failed"))
            }
            other => panic!("expected a transaction failure, got {:?}", other),
        }
    }
}
