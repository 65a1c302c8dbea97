//! # Basalt Storage Engine
//! Disk-oriented storage engine core: a fixed-size buffer pool over a paged
//! data file, a B+ tree index, record-level two-phase locking, write-ahead
//! logging with group commit, and redo/undo crash recovery.

/// B+ tree index over buffer-pool-resident pages.
pub mod btree;
/// On-page layout of B+ tree leaf and internal nodes.
pub mod btree_page;
/// The buffer pool manager.
pub mod buffer_pool;
/// Database bootstrap: wiring and lifecycle of the engine components.
pub mod database;
/// Paged data-file and append-only log-file I/O.
pub mod disk;
/// Engine error types.
pub mod error;
/// Failpoints for crash-path testing.
pub mod failpoint;
/// The catalog header page mapping index names to root page ids.
pub mod header_page;
/// The lock manager for record-level concurrency control.
pub mod lock_manager;
/// The group-commit log manager.
pub mod log_manager;
/// Log record layout and byte codec.
pub mod log_record;
/// In-memory page representation.
pub mod page;
/// Redo/undo crash recovery.
pub mod recovery;
/// The LRU frame replacer used by the buffer pool.
pub mod replacer;
/// Heap files of table pages.
pub mod table_heap;
/// Slotted heap-file pages.
pub mod table_page;
/// Transaction objects and the transaction registry.
pub mod transaction;
/// Begin/commit/abort and the checkpoint gate.
pub mod transaction_manager;
/// Length-prefixed tuple payloads.
pub mod tuple;

use std::time::Duration;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The size of one log buffer; the log file is written in blocks of this size.
pub const LOG_BUFFER_SIZE: usize = 4 * PAGE_SIZE;

/// Default number of frames in the buffer pool.
pub const BUFFER_POOL_SIZE: usize = 64;

/// How long the log flush thread waits before flushing on the timer.
pub const LOG_TIMEOUT: Duration = Duration::from_millis(300);

/// How often the deadlock detector rebuilds the wait-for graph.
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// A unique identifier for a page in the database file.
pub type PageId = i32;

/// A slot in the buffer pool.
pub type FrameId = usize;

/// A log sequence number.
pub type Lsn = i32;

/// A transaction identifier. Lower id means older transaction.
pub type TxnId = i32;

/// A slot number within a table page.
pub type SlotId = u32;

/// Sentinel meaning "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Sentinel meaning "no log record".
pub const INVALID_LSN: Lsn = -1;

/// Sentinel meaning "no transaction".
pub const INVALID_TXN_ID: TxnId = -1;

/// Page 0 of the data file maps index names to root page ids.
pub const HEADER_PAGE_ID: PageId = 0;

/// Identifies a record within a table's heap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: SlotId,
}

impl Rid {
    /// Serialized length of a record id: `int32 page_id | int32 slot`.
    pub const SERIALIZED_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot: SlotId) -> Self {
        Self { page_id, slot }
    }

    pub fn serialize_into(&self, buf: &mut impl bytes::BufMut) {
        buf.put_i32_ne(self.page_id);
        buf.put_u32_ne(self.slot);
    }

    pub fn deserialize_from(buf: &mut impl bytes::Buf) -> Self {
        let page_id = buf.get_i32_ne();
        let slot = buf.get_u32_ne();
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

pub use buffer_pool::{BufferPoolManager, Frame};
pub use database::Database;
pub use disk::DiskManager;
pub use error::{AbortReason, EngineError, EngineResult};
pub use page::Page;
pub use tuple::Tuple;
