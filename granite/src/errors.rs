use basalt::{AbortReason, EngineError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("wrong number of values: expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
}

impl ExecutionError {
    /// The lock manager's abort reason, when this failure is one. The
    /// caller is expected to drive the transaction manager's abort path.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            ExecutionError::Engine(engine) => engine.abort_reason(),
            _ => None,
        }
    }
}
