//! SQLite data store for the investment platform.
//!
//! # Intention
//!
//! - Provide one entry point, [`DataStore`], for schema setup and
//!   parameterized statement execution against a single database file.
//! - Encapsulate SQLite-specific logic, types, and error handling.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - No business logic: callers supply the SQL.
//! - Each operation opens and closes its own connection; there is no pool.

pub mod error;
pub mod sqlite;

pub use error::{DataStoreError, ErrorKind, Result};
pub use sqlite::{Connection, DataStore, Params, Row, SqliteConfig, Value};
