//! Source data access.
//!
//! A publish run talks to the database through two small traits:
//! [`SourceProvider`] hands out a [`Connection`] for the duration of one run
//! and takes it back afterwards, and a [`DataFetcher`] uses that connection to
//! produce the run's data as JSON.
//!
//! [`fetch_scoped`] owns the lifecycle. The connection is released on every
//! exit path. If the fetch failed and the release fails too, the release
//! error rides along with the fetch error instead of replacing it; a release
//! failure after a successful fetch is reported on its own.
//!
//! [`MySqlSource`] is the production provider: each acquisition opens a
//! two-connection pool that is closed again on release. Queries use `?`
//! placeholders; an array parameter expands into a `?, ?, …` list so
//! `WHERE id IN (?)` works with a list of ids.

use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde_json::{Number, Value};
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row, TypeInfo, ValueRef};
use thiserror::Error;

/// Connections per run.
const POOL_SIZE: u32 = 2;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Query has {placeholders} placeholders but {params} parameters were given")]
    ParamCount { placeholders: usize, params: usize },
    #[error("Connection is closed")]
    Closed,
    #[error("{0}")]
    Fetch(String),
}

/// Outcome of a scoped fetch that did not produce data.
#[derive(Error, Debug)]
pub enum FetchFailure {
    /// Acquiring or fetching failed; `release` holds a release failure that
    /// happened afterwards, if any.
    #[error("{cause}{}", release_note(.release))]
    Fetch {
        cause: SourceError,
        release: Option<SourceError>,
    },
    /// The fetch succeeded but the connection could not be released.
    #[error("Failed to release database connection: {0}")]
    Release(SourceError),
}

fn release_note(release: &Option<SourceError>) -> String {
    match release {
        Some(err) => format!(" (connection release also failed: {err})"),
        None => String::new(),
    }
}

#[async_trait]
pub trait Connection: Send {
    /// Run a parameterized query, returning one JSON object per row.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, SourceError>;

    /// Close the underlying resources.
    async fn close(&mut self) -> Result<(), SourceError>;
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Connection>, SourceError>;

    async fn release(&self, mut connection: Box<dyn Connection>) -> Result<(), SourceError> {
        connection.close().await
    }
}

/// Produces a run's data from an open connection.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, connection: &mut dyn Connection) -> Result<Value, SourceError>;
}

/// Declarative fetch: one query, its rows as a JSON array.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFetch {
    pub sql: String,
    pub params: Vec<Value>,
}

#[async_trait]
impl DataFetcher for QueryFetch {
    async fn fetch(&self, connection: &mut dyn Connection) -> Result<Value, SourceError> {
        Ok(Value::Array(connection.query(&self.sql, &self.params).await?))
    }
}

/// Acquire, fetch, and always release.
pub async fn fetch_scoped(
    provider: &dyn SourceProvider,
    fetcher: &dyn DataFetcher,
) -> Result<Value, FetchFailure> {
    let mut connection = provider
        .acquire()
        .await
        .map_err(|cause| FetchFailure::Fetch {
            cause,
            release: None,
        })?;

    let fetched = fetcher.fetch(connection.as_mut()).await;
    let released = provider.release(connection).await;

    match (fetched, released) {
        (Ok(data), Ok(())) => Ok(data),
        (Ok(_), Err(err)) => Err(FetchFailure::Release(err)),
        (Err(cause), released) => Err(FetchFailure::Fetch {
            cause,
            release: released.err(),
        }),
    }
}

// ============================================================================
// Placeholder expansion
// ============================================================================

/// Where the placeholder scanner is inside the SQL text.
#[derive(Debug, Clone, Copy)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Expand array parameters into placeholder lists and flatten the parameter
/// list to match. `?` inside quoted strings (backslash escapes included) and
/// inside `-- `, `#` and `/* */` comments is left alone. An empty array
/// becomes `NULL` so `IN (?)` stays valid SQL.
pub fn expand_placeholders(sql: &str, params: &[Value]) -> Result<(String, Vec<Value>), SourceError> {
    let mut out = String::with_capacity(sql.len());
    let mut flat = Vec::with_capacity(params.len());
    let mut next = params.iter();
    let mut placeholders = 0;
    let mut state = Lexeme::Code;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        out.push(ch);
        match state {
            Lexeme::Quoted(q) => {
                if ch == '\\' && q != '`' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == q {
                    state = Lexeme::Code;
                }
            }
            Lexeme::LineComment => {
                if ch == '\n' {
                    state = Lexeme::Code;
                }
            }
            Lexeme::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push('/');
                    state = Lexeme::Code;
                }
            }
            Lexeme::Code => match ch {
                '\'' | '"' | '`' => state = Lexeme::Quoted(ch),
                '#' => state = Lexeme::LineComment,
                // MySQL only treats `--` as a comment when whitespace follows.
                '-' => {
                    let mut ahead = chars.clone();
                    if ahead.next() == Some('-') && ahead.next().is_none_or(char::is_whitespace) {
                        state = Lexeme::LineComment;
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push('*');
                    state = Lexeme::BlockComment;
                }
                '?' => {
                    out.pop();
                    placeholders += 1;
                    match next.next() {
                        Some(Value::Array(items)) if items.is_empty() => out.push_str("NULL"),
                        Some(Value::Array(items)) => {
                            out.push_str(&vec!["?"; items.len()].join(", "));
                            flat.extend(items.iter().cloned());
                        }
                        Some(value) => {
                            out.push('?');
                            flat.push(value.clone());
                        }
                        None => out.push('?'),
                    }
                }
                _ => {}
            },
        }
    }

    if placeholders != params.len() {
        return Err(SourceError::ParamCount {
            placeholders,
            params: params.len(),
        });
    }
    Ok((out, flat))
}

// ============================================================================
// MySQL
// ============================================================================

/// MySQL provider; one short-lived pool per acquisition.
pub struct MySqlSource {
    options: MySqlConnectOptions,
}

impl MySqlSource {
    pub fn new(config: &DatabaseConfig) -> Self {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);
        if let Some(ca) = config.ca_cert.as_deref().filter(|c| !c.trim().is_empty()) {
            options = options
                .ssl_mode(MySqlSslMode::VerifyCa)
                .ssl_ca_from_pem(ca.as_bytes().to_vec());
        }
        Self { options }
    }
}

#[async_trait]
impl SourceProvider for MySqlSource {
    async fn acquire(&self) -> Result<Box<dyn Connection>, SourceError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(self.options.clone())
            .await?;
        Ok(Box::new(MySqlConnection { pool: Some(pool) }))
    }
}

struct MySqlConnection {
    pool: Option<MySqlPool>,
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, SourceError> {
        let pool = self.pool.as_ref().ok_or(SourceError::Closed)?;
        let (sql, params) = expand_placeholders(sql, params)?;

        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_json(query, param);
        }

        let rows = query.fetch_all(pool).await?;
        tracing::debug!(rows = rows.len(), "query returned");
        rows.iter().map(row_to_json).collect()
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }
}

fn bind_json<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(u)) => query.bind(u),
            _ => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s),
        other => query.bind(other.to_string()),
    }
}

/// Decode a row into a JSON object keyed by column name.
fn row_to_json(row: &MySqlRow) -> Result<Value, SourceError> {
    let mut object = serde_json::Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            decode_column(row, index, column.type_info().name())?
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value, SourceError> {
    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::from(row.try_get_unchecked::<i64, _>(index)?)
        }
        name if name.ends_with("UNSIGNED") => Value::from(row.try_get_unchecked::<u64, _>(index)?),
        "FLOAT" => float(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
        "DOUBLE" => float(row.try_get_unchecked::<f64, _>(index)?),
        "DATETIME" | "TIMESTAMP" => {
            let at: NaiveDateTime = row.try_get_unchecked(index)?;
            Value::String(at.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        "DATE" => {
            let date: NaiveDate = row.try_get_unchecked(index)?;
            Value::String(date.format("%Y-%m-%d").to_string())
        }
        "TIME" => {
            let time: NaiveTime = row.try_get_unchecked(index)?;
            Value::String(time.format("%H:%M:%S").to_string())
        }
        "JSON" => row.try_get_unchecked::<Value, _>(index)?,
        // DECIMAL stays a string so no precision is lost
        _ => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
    };
    Ok(value)
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockFetcher, MockSource, SourceOp};
    use serde_json::json;

    // =========================================================================
    // Placeholder expansion
    // =========================================================================

    #[test]
    fn scalar_params_pass_through() {
        let (sql, params) =
            expand_placeholders("SELECT * FROM t WHERE a = ? AND b = ?", &[json!(1), json!("x")])
                .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(params, vec![json!(1), json!("x")]);
    }

    #[test]
    fn array_params_expand() {
        let (sql, params) =
            expand_placeholders("SELECT * FROM t WHERE id IN (?) AND k = ?", &[json!([1, 2, 3]), json!("k")])
                .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id IN (?, ?, ?) AND k = ?");
        assert_eq!(params, vec![json!(1), json!(2), json!(3), json!("k")]);
    }

    #[test]
    fn empty_array_becomes_null() {
        let (sql, params) = expand_placeholders("WHERE id IN (?)", &[json!([])]).unwrap();
        assert_eq!(sql, "WHERE id IN (NULL)");
        assert!(params.is_empty());
    }

    #[test]
    fn quoted_question_marks_are_not_placeholders() {
        let (sql, _) = expand_placeholders("SELECT '?', \"?\" FROM t WHERE a = ?", &[json!(1)]).unwrap();
        assert_eq!(sql, "SELECT '?', \"?\" FROM t WHERE a = ?");
    }

    #[test]
    fn escaped_quotes_stay_inside_strings() {
        let (sql, params) =
            expand_placeholders(r"SELECT 'it\'s ?', 'a''?' FROM t WHERE id IN (?)", &[json!([1, 2])])
                .unwrap();
        assert_eq!(sql, r"SELECT 'it\'s ?', 'a''?' FROM t WHERE id IN (?, ?)");
        assert_eq!(params, vec![json!(1), json!(2)]);
    }

    #[test]
    fn comments_hide_question_marks() {
        let sql = "SELECT a -- why?\nFROM t /* a ? b */ WHERE a = ? # and ?\nAND b = ?";
        let (out, params) = expand_placeholders(sql, &[json!(1), json!([2, 3])]).unwrap();
        assert_eq!(
            out,
            "SELECT a -- why?\nFROM t /* a ? b */ WHERE a = ? # and ?\nAND b = ?, ?"
        );
        assert_eq!(params, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn double_dash_needs_whitespace_to_comment() {
        let (sql, params) = expand_placeholders("SELECT 1--?", &[json!(5)]).unwrap();
        assert_eq!(sql, "SELECT 1--?");
        assert_eq!(params, vec![json!(5)]);
    }

    #[test]
    fn param_count_mismatch_fails() {
        let err = expand_placeholders("WHERE a = ? AND b = ?", &[json!(1)]).unwrap_err();
        assert!(matches!(
            err,
            SourceError::ParamCount {
                placeholders: 2,
                params: 1
            }
        ));
    }

    // =========================================================================
    // Scoped fetch
    // =========================================================================

    #[tokio::test]
    async fn query_fetch_returns_rows_and_releases() {
        let source = MockSource::with_rows(vec![json!({ "id": 1 }), json!({ "id": 2 })]);
        let fetcher = QueryFetch {
            sql: "SELECT id FROM t WHERE k = ?".to_string(),
            params: vec![json!("a")],
        };
        let data = fetch_scoped(&source, &fetcher).await.unwrap();
        assert_eq!(data, json!([{ "id": 1 }, { "id": 2 }]));

        let ops = source.get_operations();
        assert_eq!(
            ops,
            vec![
                SourceOp::Acquire,
                SourceOp::Query {
                    sql: "SELECT id FROM t WHERE k = ?".to_string(),
                    params: vec![json!("a")],
                },
                SourceOp::Release,
            ]
        );
    }

    #[tokio::test]
    async fn failed_fetch_still_releases() {
        let source = MockSource::default();
        let fetcher = MockFetcher::failing("boom");
        let err = fetch_scoped(&source, &fetcher).await.unwrap_err();
        assert!(matches!(&err, FetchFailure::Fetch { release: None, .. }));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(source.get_operations().last(), Some(&SourceOp::Release));
    }

    #[tokio::test]
    async fn release_failure_is_attached_to_fetch_failure() {
        let source = MockSource::failing_release("pool end failed");
        let fetcher = MockFetcher::failing("boom");
        let err = fetch_scoped(&source, &fetcher).await.unwrap_err();
        match &err {
            FetchFailure::Fetch { cause, release } => {
                assert_eq!(cause.to_string(), "boom");
                assert_eq!(release.as_ref().unwrap().to_string(), "pool end failed");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "boom (connection release also failed: pool end failed)"
        );
    }

    #[tokio::test]
    async fn release_failure_alone_is_primary() {
        let source = MockSource::failing_release("pool end failed");
        let fetcher = MockFetcher::returning(json!([]));
        let err = fetch_scoped(&source, &fetcher).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Release(_)));
    }

    #[tokio::test]
    async fn acquire_failure_skips_release() {
        let source = MockSource::failing_acquire("no route to host");
        let fetcher = MockFetcher::returning(json!([]));
        let err = fetch_scoped(&source, &fetcher).await.unwrap_err();
        assert_eq!(err.to_string(), "no route to host");
        assert_eq!(source.get_operations(), vec![SourceOp::Acquire]);
    }
}
