//! Values, schemas and the row codec.
//!
//! Rows serialize into engine tuples column by column: integers as four
//! native-endian bytes, varchars as a length prefix followed by UTF-8.

use basalt::Tuple;
use bytes::{Buf, BufMut};

use crate::errors::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Varchar,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i32),
    Varchar(String),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int,
            Value::Varchar(_) => ColumnType::Varchar,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Varchar(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "{v}"),
        }
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Serializes a row that must match this schema.
    pub fn encode(&self, row: &Row) -> Result<Tuple, ExecutionError> {
        if row.len() != self.columns.len() {
            return Err(ExecutionError::ArityMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        let mut buf = Vec::new();
        for (value, column) in row.iter().zip(&self.columns) {
            if value.column_type() != column.column_type {
                return Err(ExecutionError::TypeMismatch(format!(
                    "column '{}' expects {:?}",
                    column.name, column.column_type
                )));
            }
            match value {
                Value::Int(v) => buf.put_i32_ne(*v),
                Value::Varchar(v) => {
                    buf.put_u32_ne(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
            }
        }
        Ok(Tuple::new(buf))
    }

    /// Deserializes a tuple produced by [`Schema::encode`].
    pub fn decode(&self, tuple: &Tuple) -> Result<Row, ExecutionError> {
        let mut cursor = tuple.data();
        let mut row = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match column.column_type {
                ColumnType::Int => {
                    if cursor.remaining() < 4 {
                        return Err(ExecutionError::TypeMismatch(format!(
                            "truncated tuple at column '{}'",
                            column.name
                        )));
                    }
                    row.push(Value::Int(cursor.get_i32_ne()));
                }
                ColumnType::Varchar => {
                    if cursor.remaining() < 4 {
                        return Err(ExecutionError::TypeMismatch(format!(
                            "truncated tuple at column '{}'",
                            column.name
                        )));
                    }
                    let len = cursor.get_u32_ne() as usize;
                    if cursor.remaining() < len {
                        return Err(ExecutionError::TypeMismatch(format!(
                            "truncated tuple at column '{}'",
                            column.name
                        )));
                    }
                    let mut raw = vec![0u8; len];
                    cursor.copy_to_slice(&mut raw);
                    let text = String::from_utf8(raw).map_err(|_| {
                        ExecutionError::TypeMismatch(format!(
                            "column '{}' holds invalid UTF-8",
                            column.name
                        ))
                    })?;
                    row.push(Value::Varchar(text));
                }
            }
        }
        Ok(row)
    }

    /// Extracts an integer index key from a row.
    pub fn key_from_row(&self, row: &Row, key_attr: usize) -> Result<i32, ExecutionError> {
        row.get(key_attr)
            .and_then(Value::as_int)
            .ok_or_else(|| {
                ExecutionError::TypeMismatch(format!(
                    "key attribute {key_attr} is not an integer column"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Int),
            Column::new("name", ColumnType::Varchar),
            Column::new("balance", ColumnType::Int),
        ])
    }

    #[test]
    fn encode_decode_round_trip() {
        let schema = sample_schema();
        let row = vec![
            Value::Int(7),
            Value::Varchar("alice".to_string()),
            Value::Int(-250),
        ];
        let tuple = schema.encode(&row).unwrap();
        assert_eq!(schema.decode(&tuple).unwrap(), row);
    }

    #[test]
    fn arity_and_type_checks() {
        let schema = sample_schema();
        assert!(matches!(
            schema.encode(&vec![Value::Int(1)]),
            Err(ExecutionError::ArityMismatch { .. })
        ));
        let wrong = vec![
            Value::Varchar("oops".to_string()),
            Value::Varchar("x".to_string()),
            Value::Int(0),
        ];
        assert!(matches!(
            schema.encode(&wrong),
            Err(ExecutionError::TypeMismatch(_))
        ));
    }

    #[test]
    fn key_extraction() {
        let schema = sample_schema();
        let row = vec![
            Value::Int(42),
            Value::Varchar("bob".to_string()),
            Value::Int(9),
        ];
        assert_eq!(schema.key_from_row(&row, 0).unwrap(), 42);
        assert!(schema.key_from_row(&row, 1).is_err());
        assert!(schema.key_from_row(&row, 5).is_err());
    }
}
