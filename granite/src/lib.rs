//! # Granite
//! Query-execution layer over the `basalt` storage engine: value and
//! schema types, a non-persistent catalog, and Volcano-style executors.

/// Catalog of tables and indexes.
pub mod catalog;
/// Execution error types.
pub mod errors;
/// Volcano-style executors.
pub mod executor;
/// Values, columns, schemas and the row codec.
pub mod types;

pub use catalog::{Catalog, IndexInfo, TableInfo};
pub use errors::ExecutionError;
pub use executor::{Executor, ExecutorContext};
pub use types::{Column, ColumnType, Row, Schema, Value};
