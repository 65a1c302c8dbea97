//! Log record layout and its byte-for-byte codec.
//!
//! Every record starts with a 20-byte header,
//! `int32 size | int32 lsn | int32 txn_id | int32 prev_lsn | int32 kind`,
//! followed by a kind-specific body. Multi-byte integers are written in
//! host byte order.

use bytes::{Buf, BufMut};

use crate::error::{EngineError, EngineResult};
use crate::tuple::Tuple;
use crate::{Lsn, PageId, Rid, TxnId, INVALID_LSN};

/// Size of the common record header.
pub const LOG_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordKind {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    NewPage = 6,
    Begin = 7,
    Commit = 8,
    Abort = 9,
}

impl LogRecordKind {
    fn from_i32(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Invalid),
            1 => Some(Self::Insert),
            2 => Some(Self::MarkDelete),
            3 => Some(Self::ApplyDelete),
            4 => Some(Self::RollbackDelete),
            5 => Some(Self::Update),
            6 => Some(Self::NewPage),
            7 => Some(Self::Begin),
            8 => Some(Self::Commit),
            9 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Kind-specific body of a log record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecordBody {
    /// `RID | tuple`
    Insert { rid: Rid, tuple: Tuple },
    /// `RID | tuple` — the tuple is the one being (un)deleted.
    MarkDelete { rid: Rid, tuple: Tuple },
    ApplyDelete { rid: Rid, tuple: Tuple },
    RollbackDelete { rid: Rid, tuple: Tuple },
    /// `RID | old_tuple | new_tuple`
    Update {
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    },
    /// `int32 prev_page_id | int32 page_id`
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
    Begin,
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub size: i32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub body: LogRecordBody,
}

impl LogRecord {
    fn new(txn_id: TxnId, prev_lsn: Lsn, body: LogRecordBody) -> Self {
        let mut record = LogRecord {
            size: 0,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            body,
        };
        record.size = record.serialized_size() as i32;
        record
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::Insert { rid, tuple })
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::MarkDelete { rid, tuple })
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::ApplyDelete { rid, tuple })
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::RollbackDelete { rid, tuple })
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordBody::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordBody::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordBody::Begin)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::Commit)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::Abort)
    }

    pub fn kind(&self) -> LogRecordKind {
        match &self.body {
            LogRecordBody::Insert { .. } => LogRecordKind::Insert,
            LogRecordBody::MarkDelete { .. } => LogRecordKind::MarkDelete,
            LogRecordBody::ApplyDelete { .. } => LogRecordKind::ApplyDelete,
            LogRecordBody::RollbackDelete { .. } => LogRecordKind::RollbackDelete,
            LogRecordBody::Update { .. } => LogRecordKind::Update,
            LogRecordBody::NewPage { .. } => LogRecordKind::NewPage,
            LogRecordBody::Begin => LogRecordKind::Begin,
            LogRecordBody::Commit => LogRecordKind::Commit,
            LogRecordBody::Abort => LogRecordKind::Abort,
        }
    }

    pub fn serialized_size(&self) -> usize {
        let body = match &self.body {
            LogRecordBody::Insert { tuple, .. }
            | LogRecordBody::MarkDelete { tuple, .. }
            | LogRecordBody::ApplyDelete { tuple, .. }
            | LogRecordBody::RollbackDelete { tuple, .. } => {
                Rid::SERIALIZED_SIZE + tuple.serialized_size()
            }
            LogRecordBody::Update {
                old_tuple,
                new_tuple,
                ..
            } => Rid::SERIALIZED_SIZE + old_tuple.serialized_size() + new_tuple.serialized_size(),
            LogRecordBody::NewPage { .. } => 8,
            LogRecordBody::Begin | LogRecordBody::Commit | LogRecordBody::Abort => 0,
        };
        LOG_HEADER_SIZE + body
    }

    pub fn serialize_into(&self, buf: &mut impl BufMut) {
        buf.put_i32_ne(self.size);
        buf.put_i32_ne(self.lsn);
        buf.put_i32_ne(self.txn_id);
        buf.put_i32_ne(self.prev_lsn);
        buf.put_i32_ne(self.kind() as i32);
        match &self.body {
            LogRecordBody::Insert { rid, tuple }
            | LogRecordBody::MarkDelete { rid, tuple }
            | LogRecordBody::ApplyDelete { rid, tuple }
            | LogRecordBody::RollbackDelete { rid, tuple } => {
                rid.serialize_into(buf);
                tuple.serialize_into(buf);
            }
            LogRecordBody::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                rid.serialize_into(buf);
                old_tuple.serialize_into(buf);
                new_tuple.serialize_into(buf);
            }
            LogRecordBody::NewPage {
                prev_page_id,
                page_id,
            } => {
                buf.put_i32_ne(*prev_page_id);
                buf.put_i32_ne(*page_id);
            }
            LogRecordBody::Begin | LogRecordBody::Commit | LogRecordBody::Abort => {}
        }
    }

    /// Deserializes the record at the front of `data`. `Ok(None)` means
    /// end-of-data in this block (a zero `size` field or bare zero fill);
    /// anything else malformed is a corruption error.
    pub fn deserialize(data: &[u8]) -> EngineResult<Option<LogRecord>> {
        if data.len() < LOG_HEADER_SIZE {
            return Ok(None);
        }
        let mut cursor = data;
        let size = cursor.get_i32_ne();
        if size == 0 {
            return Ok(None);
        }
        if size < LOG_HEADER_SIZE as i32 || size as usize > data.len() {
            return Err(EngineError::Corrupted(format!(
                "log record size {size} out of bounds"
            )));
        }
        let lsn = cursor.get_i32_ne();
        let txn_id = cursor.get_i32_ne();
        let prev_lsn = cursor.get_i32_ne();
        let raw_kind = cursor.get_i32_ne();
        let kind = LogRecordKind::from_i32(raw_kind)
            .ok_or_else(|| EngineError::Corrupted(format!("unknown log record kind {raw_kind}")))?;

        let body = match kind {
            LogRecordKind::Invalid => {
                return Err(EngineError::Corrupted("invalid log record kind".into()))
            }
            LogRecordKind::Insert
            | LogRecordKind::MarkDelete
            | LogRecordKind::ApplyDelete
            | LogRecordKind::RollbackDelete => {
                let rid = Rid::deserialize_from(&mut cursor);
                let tuple = Tuple::deserialize_from(&mut cursor)
                    .ok_or_else(|| EngineError::Corrupted("truncated tuple in log record".into()))?;
                match kind {
                    LogRecordKind::Insert => LogRecordBody::Insert { rid, tuple },
                    LogRecordKind::MarkDelete => LogRecordBody::MarkDelete { rid, tuple },
                    LogRecordKind::ApplyDelete => LogRecordBody::ApplyDelete { rid, tuple },
                    _ => LogRecordBody::RollbackDelete { rid, tuple },
                }
            }
            LogRecordKind::Update => {
                let rid = Rid::deserialize_from(&mut cursor);
                let old_tuple = Tuple::deserialize_from(&mut cursor)
                    .ok_or_else(|| EngineError::Corrupted("truncated tuple in log record".into()))?;
                let new_tuple = Tuple::deserialize_from(&mut cursor)
                    .ok_or_else(|| EngineError::Corrupted("truncated tuple in log record".into()))?;
                LogRecordBody::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordKind::NewPage => {
                let prev_page_id = cursor.get_i32_ne();
                let page_id = cursor.get_i32_ne();
                LogRecordBody::NewPage {
                    prev_page_id,
                    page_id,
                }
            }
            LogRecordKind::Begin => LogRecordBody::Begin,
            LogRecordKind::Commit => LogRecordBody::Commit,
            LogRecordKind::Abort => LogRecordBody::Abort,
        };

        let record = LogRecord {
            size,
            lsn,
            txn_id,
            prev_lsn,
            body,
        };
        if record.serialized_size() as i32 != size {
            return Err(EngineError::Corrupted(format!(
                "log record size mismatch: header says {size}, body implies {}",
                record.serialized_size()
            )));
        }
        Ok(Some(record))
    }
}
