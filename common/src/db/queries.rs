// Parameterized T-SQL for the platform tables
// Builders are pure so the generated SQL and parameter order can be unit tested

use crate::errors::DatabaseError;
use crate::models::{
    ChecksumSelector, FindRequestsQuery, QueueSelector, STATUS_FAILED, STATUS_SUCCEEDED,
};
use chrono::NaiveDateTime;

/// Upload rows that feed the file-integration scheduler
pub const UPLOAD_TYPE_ID: i32 = 5;
pub const CLASS_NAME_TYPE: i32 = 2;
pub const RUN_ENABLED: i32 = 1;

/// Queue state that makes the scheduler pick a district up again
pub const QUEUE_STATUS_PENDING: i32 = 2;
pub const QUEUE_RESULT_RERUN: i32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i32),
    Text(String),
    DateTime(NaiveDateTime),
}

/// SQL text plus positional `@Pn` parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl ParamQuery {
    /// Register a parameter and return its placeholder
    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("@P{}", self.params.len())
    }

    fn in_clause(&mut self, column: &str, values: impl IntoIterator<Item = SqlParam>) -> String {
        let placeholders: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        format!("{} IN ({})", column, placeholders.join(", "))
    }
}

/// Escape LIKE wildcards so user input matches literally
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '[' => escaped.push_str("[[]"),
            '%' => escaped.push_str("[%]"),
            '_' => escaped.push_str("[_]"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn list_request_types(name_filter: Option<&str>) -> ParamQuery {
    let mut query = ParamQuery::default();
    let mut sql = String::from("SELECT DataRequestTypeID, Name FROM dbo.DataRequestType");
    if let Some(filter) = name_filter.filter(|f| !f.is_empty()) {
        let p = query.bind(SqlParam::Text(format!("%{}%", escape_like(filter))));
        sql.push_str(&format!(" WHERE Name LIKE {}", p));
    }
    sql.push_str(" ORDER BY Name");
    query.sql = sql;
    query
}

/// Type ids whose name starts with any of the prefixes. None when no prefixes.
pub fn type_ids_for_prefixes(prefixes: &[String]) -> Option<ParamQuery> {
    if prefixes.is_empty() {
        return None;
    }
    let mut query = ParamQuery::default();
    let clauses: Vec<String> = prefixes
        .iter()
        .map(|p| {
            let placeholder = query.bind(SqlParam::Text(format!("{}%", escape_like(p))));
            format!("Name LIKE {}", placeholder)
        })
        .collect();
    query.sql = format!(
        "SELECT DataRequestTypeID FROM dbo.DataRequestType WHERE {}",
        clauses.join(" OR ")
    );
    Some(query)
}

/// Latest request per (district, type), restricted to the resolved type ids
///
/// An empty status list falls back to failed and succeeded requests.
pub fn find_latest_requests(query: &FindRequestsQuery, type_ids: &[i32]) -> ParamQuery {
    let mut q = ParamQuery::default();

    let statuses: &[i32] = if query.statuses.is_empty() {
        &[STATUS_FAILED, STATUS_SUCCEEDED]
    } else {
        &query.statuses
    };
    let mut inner_filters = vec![q.in_clause(
        "Status",
        statuses.iter().map(|s| SqlParam::Int(*s)),
    )];
    if !query.district_ids.is_empty() {
        inner_filters.push(q.in_clause(
            "DistrictID",
            dedup(&query.district_ids).into_iter().map(SqlParam::Int),
        ));
    }
    if !type_ids.is_empty() {
        inner_filters.push(q.in_clause(
            "DataRequestTypeID",
            dedup(type_ids).into_iter().map(SqlParam::Int),
        ));
    }

    let mut sql = format!(
        r#"SELECT r.RequestID, r.DistrictID, r.DataRequestTypeID,
       t.Name AS DataRequestTypeName, r.ImportedFileName, r.Status, r.RequestTime
FROM dbo.Request r
JOIN (
    SELECT DistrictID, DataRequestTypeID, MAX(RequestID) AS MaxRequestID
    FROM dbo.Request
    WHERE {}
    GROUP BY DistrictID, DataRequestTypeID
) latest ON r.DistrictID = latest.DistrictID
        AND r.DataRequestTypeID = latest.DataRequestTypeID
        AND r.RequestID = latest.MaxRequestID
JOIN dbo.DataRequestType t ON t.DataRequestTypeID = r.DataRequestTypeID"#,
        inner_filters.join(" AND ")
    );

    if let Some(since) = query.since {
        let p = q.bind(SqlParam::DateTime(since.naive_utc()));
        sql.push_str(&format!("\nWHERE r.RequestTime >= {}", p));
    }
    sql.push_str("\nORDER BY r.RequestTime DESC");

    q.sql = sql;
    q
}

pub fn email_content(request_id: i32) -> ParamQuery {
    let mut q = ParamQuery::default();
    let p = q.bind(SqlParam::Int(request_id));
    q.sql = format!(
        "SELECT TOP 1 EmailContent, FileAttachContent FROM dbo.RequestEmailNotification WHERE RequestID = {}",
        p
    );
    q
}

pub fn find_request(request_id: i32) -> ParamQuery {
    let mut q = ParamQuery::default();
    let p = q.bind(SqlParam::Int(request_id));
    q.sql = format!(
        "SELECT TOP 1 RequestID, DistrictID, ImportedFileName FROM dbo.Request WHERE RequestID = {}",
        p
    );
    q
}

pub fn upload_directory_for_district(district_id: i32) -> ParamQuery {
    let mut q = ParamQuery::default();
    let p = q.bind(SqlParam::Int(district_id));
    q.sql = format!(
        "SELECT TOP 1 DirectoryPath FROM dbo.xpsDistrictUpload WHERE DistrictID = {} ORDER BY xpsDistrictUploadID",
        p
    );
    q
}

/// Filters shared by the checksum and queue mutations
fn upload_filters(
    q: &mut ParamQuery,
    district_ids: &std::collections::BTreeSet<i32>,
    directory_paths: &std::collections::BTreeSet<String>,
) -> Result<Vec<String>, DatabaseError> {
    if district_ids.is_empty() {
        return Err(DatabaseError::InvalidInput(
            "at least one district id is required".to_string(),
        ));
    }

    let mut clauses = vec![
        format!("du.UploadTypeID = {}", UPLOAD_TYPE_ID),
        format!("du.ClassNameType = {}", CLASS_NAME_TYPE),
        format!("du.Run = {}", RUN_ENABLED),
    ];
    clauses.push(q.in_clause(
        "du.DistrictID",
        district_ids.iter().map(|d| SqlParam::Int(*d)),
    ));
    if !directory_paths.is_empty() {
        clauses.push(q.in_clause(
            "du.DirectoryPath",
            directory_paths.iter().map(|p| SqlParam::Text(p.clone())),
        ));
    }
    Ok(clauses)
}

pub fn clear_checksums(selector: &ChecksumSelector) -> Result<ParamQuery, DatabaseError> {
    let mut q = ParamQuery::default();
    let mut clauses = upload_filters(&mut q, &selector.district_ids, &selector.directory_paths)?;
    if !selector.keys.is_empty() {
        clauses.push(q.in_clause(
            "ufc.[key]",
            selector.keys.iter().map(|k| SqlParam::Text(k.clone())),
        ));
    }

    q.sql = format!(
        r#"DELETE ufc
FROM dbo.UploadFileIntegrationChecksum ufc
JOIN dbo.xpsDistrictUpload du ON ufc.XpsDistrictUploadID = du.xpsDistrictUploadID
WHERE {}"#,
        clauses.join(" AND ")
    );
    Ok(q)
}

pub fn bump_latest_queue(selector: &QueueSelector) -> Result<ParamQuery, DatabaseError> {
    let mut q = ParamQuery::default();
    let clauses = upload_filters(&mut q, &selector.district_ids, &selector.directory_paths)?;

    q.sql = format!(
        r#"UPDATE q
SET q.xpsQueueStatusID = {}, q.xpsQueueResultID = {}
FROM dbo.xpsQueue q
JOIN (
    SELECT du.DistrictID, MAX(q2.xpsQueueID) AS MaxQ
    FROM dbo.xpsQueue q2
    JOIN dbo.xpsDistrictUpload du ON q2.xpsDistrictUploadID = du.xpsDistrictUploadID
    WHERE {}
    GROUP BY du.DistrictID
) latest ON latest.MaxQ = q.xpsQueueID"#,
        QUEUE_STATUS_PENDING,
        QUEUE_RESULT_RERUN,
        clauses.join(" AND ")
    );
    Ok(q)
}

fn dedup(values: &[i32]) -> Vec<i32> {
    let mut values = values.to_vec();
    values.sort_unstable();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("SAT"), "SAT");
        assert_eq!(escape_like("50%_[x]"), "50[%][_][[]x]");
    }

    #[test]
    fn test_list_request_types_without_filter() {
        let q = list_request_types(None);
        assert_eq!(
            q.sql,
            "SELECT DataRequestTypeID, Name FROM dbo.DataRequestType ORDER BY Name"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_list_request_types_with_filter() {
        let q = list_request_types(Some("psat"));
        assert!(q.sql.contains("WHERE Name LIKE @P1"));
        assert_eq!(q.params, vec![SqlParam::Text("%psat%".into())]);
    }

    #[test]
    fn test_type_prefixes_are_or_joined() {
        assert!(type_ids_for_prefixes(&[]).is_none());
        let q = type_ids_for_prefixes(&["SAT".into(), "PSAT".into()]).unwrap();
        assert!(q.sql.ends_with("WHERE Name LIKE @P1 OR Name LIKE @P2"));
        assert_eq!(
            q.params,
            vec![SqlParam::Text("SAT%".into()), SqlParam::Text("PSAT%".into())]
        );
    }

    #[test]
    fn test_find_latest_requests_parameter_order() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let query = FindRequestsQuery::for_districts(vec![20, 10, 20]).since(since);
        let q = find_latest_requests(&query, &[3]);

        assert!(q.sql.contains("WHERE Status IN (@P1, @P2) AND DistrictID IN (@P3, @P4) AND DataRequestTypeID IN (@P5)"));
        assert!(q.sql.contains("WHERE r.RequestTime >= @P6"));
        assert!(q.sql.ends_with("ORDER BY r.RequestTime DESC"));
        assert_eq!(q.params.len(), 6);
        assert_eq!(q.params[2], SqlParam::Int(10));
        assert_eq!(q.params[3], SqlParam::Int(20));
        assert_eq!(q.params[5], SqlParam::DateTime(since.naive_utc()));
    }

    #[test]
    fn test_find_latest_requests_without_optional_filters() {
        let q = find_latest_requests(&FindRequestsQuery::default(), &[]);
        assert!(q.sql.contains("WHERE Status IN (@P1, @P2)\n"));
        assert!(!q.sql.contains("RequestTime >="));
        assert_eq!(q.params, vec![SqlParam::Int(4), SqlParam::Int(5)]);
    }

    #[test]
    fn test_find_latest_requests_empty_statuses_use_defaults() {
        let query = FindRequestsQuery {
            statuses: Vec::new(),
            ..FindRequestsQuery::for_districts(vec![8])
        };
        let q = find_latest_requests(&query, &[]);
        assert!(!q.sql.contains("IN ()"));
        assert!(q.sql.contains("WHERE Status IN (@P1, @P2) AND DistrictID IN (@P3)"));
        assert_eq!(
            q.params,
            vec![SqlParam::Int(4), SqlParam::Int(5), SqlParam::Int(8)]
        );
    }

    #[test]
    fn test_clear_checksums_requires_districts() {
        let err = clear_checksums(&ChecksumSelector::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidInput(_)));
    }

    #[test]
    fn test_clear_checksums_with_all_filters() {
        let selector = ChecksumSelector {
            district_ids: [7, 3].into_iter().collect(),
            directory_paths: ["F:/FTProot/Districts/7".to_string()].into_iter().collect(),
            keys: ["roster".to_string()].into_iter().collect(),
        };
        let q = clear_checksums(&selector).unwrap();
        assert!(q.sql.starts_with("DELETE ufc"));
        assert!(q.sql.contains("du.UploadTypeID = 5 AND du.ClassNameType = 2 AND du.Run = 1"));
        assert!(q.sql.contains("du.DistrictID IN (@P1, @P2)"));
        assert!(q.sql.contains("du.DirectoryPath IN (@P3)"));
        assert!(q.sql.contains("ufc.[key] IN (@P4)"));
        assert_eq!(q.params[0], SqlParam::Int(3));
    }

    #[test]
    fn test_bump_latest_queue_sets_pending_state() {
        let selector = QueueSelector {
            district_ids: [42].into_iter().collect(),
            directory_paths: Default::default(),
        };
        let q = bump_latest_queue(&selector).unwrap();
        assert!(q.sql.contains("SET q.xpsQueueStatusID = 2, q.xpsQueueResultID = 5"));
        assert!(q.sql.contains("du.DistrictID IN (@P1)"));
        assert!(!q.sql.contains("DirectoryPath"));
        assert_eq!(q.params, vec![SqlParam::Int(42)]);
    }
}
