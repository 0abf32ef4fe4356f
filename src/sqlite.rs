use crate::error::{DataStoreError, Result};
use rusqlite::types::{FromSqlError, ToSqlOutput, Type, ValueRef};
use rusqlite::{params_from_iter, Batch, Connection as SqliteConnection, Statement, ToSql};
use serde::{Deserialize, Serialize};
use std::ops::Index;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default database file, relative to the process working directory.
pub const DEFAULT_DB_PATH: &str = "invest_platform.sqlite";

/// Default schema script, shipped next to the crate sources.
pub const DEFAULT_SCHEMA_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/schema/schema.sql");

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Bound as 0/1. Rows read back from the engine carry `Integer` instead.
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// Text that is not valid UTF-8 is rejected rather than repaired.
impl TryFrom<ValueRef<'_>> for Value {
    type Error = FromSqlError;

    fn try_from(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(
                std::str::from_utf8(t)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))?
                    .to_string(),
            ),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(*b as i64)),
        })
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_value! {
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Real,
    f32 => Real,
    String => Text,
    &str => Text,
    Vec<u8> => Blob,
    &[u8] => Blob,
    bool => Boolean,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Positional parameter bindings for SQL queries
///
/// Values are bound in order into `?` / `?N` placeholders and never spliced
/// into the statement text.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: Vec<Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Append the next positional value
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::new()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params { values }
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Params {
    fn from(values: [T; N]) -> Self {
        Params {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// A result row: column names in statement order, each mapped to its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    fn from_sqlite(columns: &Arc<[String]>, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let values = (0..columns.len())
            .map(|i| {
                let value = row.get_ref(i)?;
                let data_type = value.data_type();
                Value::try_from(value).map_err(|e| match e {
                    FromSqlError::Other(err) => {
                        rusqlite::Error::FromSqlConversionFailure(i, data_type, err)
                    }
                    other => rusqlite::Error::FromSqlConversionFailure(
                        i,
                        Type::Text,
                        Box::new(other),
                    ),
                })
            })
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Self {
            columns: Arc::clone(columns),
            values,
        })
    }

    /// Look up a value by column name. The first matching column wins.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, column: &str) -> &Value {
        match self.get(column) {
            Some(value) => value,
            None => panic!("no column named '{}' in row", column),
        }
    }
}

/// SQLite data store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// Path to the schema script replayed by `init_schema`
    pub schema_path: PathBuf,
    /// Turn on `PRAGMA foreign_keys` for every connection
    pub foreign_keys: bool,
    /// Log failed statements through `tracing`
    pub log_errors: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            foreign_keys: true,
            log_errors: true,
        }
    }
}

impl SqliteConfig {
    /// Create a new SQLite config with database and schema paths
    pub fn new(db_path: impl Into<PathBuf>, schema_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            schema_path: schema_path.into(),
            ..Self::default()
        }
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_schema_path(mut self, schema_path: impl Into<PathBuf>) -> Self {
        self.schema_path = schema_path.into();
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_log_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }
}

/// A single connection to the store's database file.
///
/// The underlying handle is closed when this value is dropped, so a
/// connection never outlives the operation that acquired it.
pub struct Connection {
    conn: SqliteConnection,
    path: PathBuf,
}

impl Connection {
    /// Open a connection, creating the database file if it does not exist.
    pub fn open(path: &Path, foreign_keys: bool) -> Result<Self> {
        let open_err = |source| DataStoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let conn = SqliteConnection::open(path).map_err(open_err)?;
        if foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(open_err)?;
        }
        debug!(path = %path.display(), "opened sqlite connection");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Get a reference to the underlying SqliteConnection.
    pub fn as_conn(&self) -> &SqliteConnection {
        &self.conn
    }

    /// Run a script of one or more statements without parameters.
    pub fn execute_batch(&self, script: &str) -> rusqlite::Result<()> {
        self.conn.execute_batch(script)
    }

    /// Run one mutating statement inside its own transaction.
    ///
    /// Commits and returns the last inserted rowid on success. On failure the
    /// transaction is rolled back before the error is returned. The rowid is
    /// only meaningful for INSERT; other statements report whatever the
    /// connection last inserted, which is 0 on a fresh connection.
    pub fn execute(&mut self, sql: &str, params: &Params) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DataStoreError::statement(sql, e))?;
        let outcome = prepare_single(&tx, sql).and_then(|mut stmt| {
            stmt.execute(params_from_iter(params.values.iter()))
                .map_err(|e| DataStoreError::statement(sql, e))
        });
        match outcome {
            Ok(changed) => {
                let id = tx.last_insert_rowid();
                tx.commit().map_err(|e| DataStoreError::statement(sql, e))?;
                debug!(changed, id, "statement committed");
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Run a read-only statement and collect every row.
    pub fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.query_rows(sql, params, None)
    }

    /// Run a read-only statement and return its first row, if any.
    pub fn query_first(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        Ok(self.query_rows(sql, params, Some(1))?.pop())
    }

    fn query_rows(&self, sql: &str, params: &Params, limit: Option<usize>) -> Result<Vec<Row>> {
        let stmt_err = |e| DataStoreError::statement(sql, e);
        let mut stmt = prepare_single(&self.conn, sql)?;
        if !stmt.readonly() {
            return Err(DataStoreError::NotReadOnly {
                sql: sql.to_string(),
            });
        }
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt
            .query(params_from_iter(params.values.iter()))
            .map_err(stmt_err)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(stmt_err)? {
            result.push(Row::from_sqlite(&columns, row).map_err(stmt_err)?);
            if limit.is_some_and(|n| result.len() >= n) {
                break;
            }
        }
        Ok(result)
    }

    /// Close the connection, surfacing any error the engine reports.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn
            .close()
            .map_err(|(_, source)| DataStoreError::Close {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "closed sqlite connection");
        Ok(())
    }
}

/// Prepare `sql`, which must hold exactly one statement.
///
/// Trailing whitespace, comments and semicolons are fine; a second statement
/// fails with `MultipleStatement` instead of being skipped.
fn prepare_single<'c>(conn: &'c SqliteConnection, sql: &str) -> Result<Statement<'c>> {
    let stmt_err = |e| DataStoreError::statement(sql, e);
    let mut batch = Batch::new(conn, sql);
    let stmt = batch
        .next()
        .map_err(stmt_err)?
        .ok_or_else(|| stmt_err(rusqlite::Error::InvalidQuery))?;
    if batch.next().map_err(stmt_err)?.is_some() {
        return Err(stmt_err(rusqlite::Error::MultipleStatement));
    }
    Ok(stmt)
}

/// Entry point for schema setup and statement execution against one
/// database file.
///
/// Every operation opens its own connection and releases it before
/// returning; nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct DataStore {
    config: SqliteConfig,
}

impl DataStore {
    /// Create a new data store with the given config
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    /// Open a fresh connection to the configured database file.
    pub fn acquire(&self) -> Result<Connection> {
        Connection::open(&self.config.db_path, self.config.foreign_keys)
    }

    /// Replay the schema script against the database.
    ///
    /// Whether replaying is harmless depends on the script itself; the store
    /// does not guard against `CREATE TABLE` without `IF NOT EXISTS`.
    pub fn init_schema(&self) -> Result<()> {
        let schema_path = &self.config.schema_path;
        info!(
            db = %self.config.db_path.display(),
            schema = %schema_path.display(),
            "initializing database schema"
        );
        let script =
            std::fs::read_to_string(schema_path).map_err(|source| DataStoreError::FileAccess {
                path: schema_path.clone(),
                source,
            })?;

        let conn = self.acquire()?;
        conn.execute_batch(&script).map_err(DataStoreError::Schema)?;
        conn.close()?;
        info!("database schema initialized");
        Ok(())
    }

    /// Run one parameterized INSERT, UPDATE or DELETE.
    ///
    /// Returns the last inserted rowid once the change is committed.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<i64> {
        let params = params.into();
        let result = self
            .acquire()
            .and_then(|mut conn| conn.execute(sql, &params));
        self.report(result)
    }

    /// Run a read-only statement and return every row, in order.
    pub fn fetch_all(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        let params = params.into();
        let result = self.acquire().and_then(|conn| conn.query(sql, &params));
        self.report(result)
    }

    /// Run a read-only statement and return its first row.
    pub fn fetch_one(&self, sql: &str, params: impl Into<Params>) -> Result<Option<Row>> {
        let params = params.into();
        let result = self
            .acquire()
            .and_then(|conn| conn.query_first(sql, &params));
        self.report(result)
    }

    /// Like [`DataStore::execute`], but a failure becomes `None`.
    pub fn execute_or_none(&self, sql: &str, params: impl Into<Params>) -> Option<i64> {
        self.execute(sql, params).ok()
    }

    /// Like [`DataStore::fetch_all`], but a failure becomes an empty list.
    pub fn fetch_all_or_empty(&self, sql: &str, params: impl Into<Params>) -> Vec<Row> {
        self.fetch_all(sql, params).unwrap_or_default()
    }

    /// Like [`DataStore::fetch_one`], but a failure becomes `None`.
    pub fn fetch_one_or_none(&self, sql: &str, params: impl Into<Params>) -> Option<Row> {
        self.fetch_one(sql, params).ok().flatten()
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self.fetch_one(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
        )?;
        Ok(row
            .and_then(|r| r.get("n").and_then(Value::as_i64))
            .is_some_and(|n| n > 0))
    }

    /// Get the row count for a table
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM \"{}\"", table.replace('"', "\"\""));
        let row = self.fetch_one(&sql, ())?;
        Ok(row.and_then(|r| r.get("n").and_then(Value::as_i64)).unwrap_or(0))
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.config.log_errors {
                error!(error = %e, "database operation failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> DataStore {
        let config = SqliteConfig::new(dir.path().join("test.db"), dir.path().join("schema.sql"));
        std::fs::write(
            &config.schema_path,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, data BLOB);",
        )
        .unwrap();
        DataStore::new(config)
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(7), Value::Integer(7));
        assert_eq!(Value::from("x"), Value::Text("x".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(1.5)), Value::Real(1.5));
        assert_eq!(Value::from(true).as_i64(), Some(1));
        assert_eq!(Value::Integer(2).as_f64(), Some(2.0));
        assert_eq!(Value::Text("a".into()).as_i64(), None);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"db_path": "other.sqlite", "log_errors": false}"#).unwrap();
        assert_eq!(config.db_path, PathBuf::from("other.sqlite"));
        assert_eq!(config.schema_path, PathBuf::from(DEFAULT_SCHEMA_PATH));
        assert!(config.foreign_keys);
        assert!(!config.log_errors);
    }

    #[test]
    fn test_params_builders() {
        let params = Params::new().with_value("a").with_value(1);
        assert_eq!(params.len(), 2);
        assert_eq!(params.values[0], Value::Text("a".into()));
        assert!(Params::from(()).is_empty());
        assert_eq!(Params::from([1, 2, 3]).len(), 3);
    }

    #[test]
    fn test_row_access() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.init_schema().unwrap();
        store
            .execute(
                "INSERT INTO items (name, price, data) VALUES (?, ?, ?)",
                Params::new()
                    .with_value("widget")
                    .with_value(9.5)
                    .with_value(vec![1u8, 2, 3]),
            )
            .unwrap();

        let row = store
            .fetch_one("SELECT id, name, price, data FROM items", ())
            .unwrap()
            .unwrap();
        assert_eq!(row.columns(), ["id", "name", "price", "data"]);
        assert_eq!(row["name"].as_str(), Some("widget"));
        assert_eq!(row.get("price").and_then(Value::as_f64), Some(9.5));
        assert_eq!(row.get_index(3).and_then(Value::as_blob), Some(&[1u8, 2, 3][..]));
        assert!(row.get("missing").is_none());

        let names: Vec<&str> = row.iter().map(|(c, _)| c).collect();
        assert_eq!(names, ["id", "name", "price", "data"]);
    }

    #[test]
    fn test_boolean_binds_as_integer() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.init_schema().unwrap();
        store
            .execute("INSERT INTO items (name, data) VALUES ('flag', ?)", [true])
            .unwrap();
        let row = store.fetch_one("SELECT data FROM items", ()).unwrap().unwrap();
        assert_eq!(row["data"], Value::Integer(1));
    }

    #[test]
    fn test_invalid_utf8_text_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let err = store
            .fetch_one("SELECT CAST(x'ff' AS TEXT) AS t", ())
            .unwrap_err();
        assert!(matches!(
            err,
            DataStoreError::Statement {
                source: rusqlite::Error::FromSqlConversionFailure(0, Type::Text, _),
                ..
            }
        ));

        let row = store
            .fetch_one("SELECT CAST(x'6869' AS TEXT) AS t", ())
            .unwrap()
            .unwrap();
        assert_eq!(row["t"].as_str(), Some("hi"));
    }

    #[test]
    fn test_fetch_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.init_schema().unwrap();
        let err = store
            .fetch_all("INSERT INTO items (name) VALUES ('x')", ())
            .unwrap_err();
        assert!(matches!(err, DataStoreError::NotReadOnly { .. }));
        assert_eq!(store.count_rows("items").unwrap(), 0);
    }

    #[test]
    fn test_table_helpers() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        assert!(!store.table_exists("items").unwrap());
        store.init_schema().unwrap();
        assert!(store.table_exists("items").unwrap());
        assert_eq!(store.count_rows("items").unwrap(), 0);
    }

    #[test]
    fn test_connection_close() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let conn = store.acquire().unwrap();
        assert!(store.path().exists());
        conn.close().unwrap();
    }

    #[test]
    fn test_update_returns_after_commit() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.init_schema().unwrap();
        let id = store
            .execute("INSERT INTO items (name) VALUES (?)", ["a"])
            .unwrap();
        store
            .execute(
                "UPDATE items SET name = ? WHERE id = ?",
                Params::new().with_value("b").with_value(id),
            )
            .unwrap();
        let row = store
            .fetch_one("SELECT name FROM items WHERE id = ?", [id])
            .unwrap()
            .unwrap();
        assert_eq!(row["name"].as_str(), Some("b"));
    }
}
