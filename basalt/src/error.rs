//! Error types for the storage engine.

use crate::TxnId;
use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// The reason a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,

    #[error("another transaction is already upgrading on this record")]
    UpgradeConflict,

    #[error("chosen as deadlock victim")]
    Deadlock,

    #[error("shared lock requested at read-uncommitted isolation")]
    SharedOnReadUncommitted,
}

/// Errors surfaced by the engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No free frame and every resident frame is pinned.
    #[error("buffer pool exhausted: all frames are pinned")]
    BufferPoolExhausted,

    /// A lock call failed and the transaction is now `ABORTED`; the caller
    /// must drive the transaction manager's abort path.
    #[error("transaction {txn_id} aborted: {reason}")]
    TransactionAborted { txn_id: TxnId, reason: AbortReason },

    /// The log contained something other than well-formed records or
    /// zero-fill; fatal for recovery.
    #[error("log corrupted: {0}")]
    Corrupted(String),

    #[error("tuple of {size} bytes cannot fit in any page")]
    TupleTooLarge { size: usize },
}

impl EngineError {
    /// The abort reason, if this error is a transaction abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            EngineError::TransactionAborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reason_display() {
        let err = EngineError::TransactionAborted {
            txn_id: 7,
            reason: AbortReason::Deadlock,
        };
        assert_eq!(
            err.to_string(),
            "transaction 7 aborted: chosen as deadlock victim"
        );
        assert_eq!(err.abort_reason(), Some(AbortReason::Deadlock));
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.abort_reason().is_none());
    }
}
