//! Crash recovery: a redo pass over the whole log, then undo of every
//! transaction that never reached a commit or abort record.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};

use crate::buffer_pool::BufferPoolManager;
use crate::disk::DiskManager;
use crate::error::{EngineError, EngineResult};
use crate::log_record::{LogRecord, LogRecordBody};
use crate::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID, LOG_BUFFER_SIZE};

pub struct LogRecovery {
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
    /// Transactions seen in the log without a terminal record, mapped to
    /// their latest LSN. After redo this is exactly the loser set.
    active_txn: HashMap<TxnId, Lsn>,
    /// Absolute file offset of every record, for walking prev_lsn chains.
    lsn_offset: HashMap<Lsn, u64>,
    max_lsn: Lsn,
    max_txn_id: TxnId,
}

impl LogRecovery {
    pub fn new(disk: Arc<DiskManager>, bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            disk,
            bpm,
            active_txn: HashMap::new(),
            lsn_offset: HashMap::new(),
            max_lsn: INVALID_LSN,
            max_txn_id: -1,
        }
    }

    /// Replays the log from the beginning, reapplying any record whose LSN
    /// is newer than its target page.
    pub fn redo(&mut self) -> EngineResult<()> {
        let mut buffer = vec![0u8; LOG_BUFFER_SIZE];
        let mut file_offset = 0u64;

        while self.disk.read_log(&mut buffer, file_offset)? {
            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&buffer[pos..])? {
                self.lsn_offset.insert(record.lsn, file_offset + pos as u64);
                self.active_txn.insert(record.txn_id, record.lsn);
                self.max_lsn = self.max_lsn.max(record.lsn);
                self.max_txn_id = self.max_txn_id.max(record.txn_id);

                match &record.body {
                    LogRecordBody::Insert { rid, tuple } => {
                        self.redo_on_page(rid.page_id, record.lsn, |page| {
                            page.insert_tuple_at(rid.slot, tuple);
                        })?;
                    }
                    LogRecordBody::MarkDelete { rid, .. } => {
                        self.redo_on_page(rid.page_id, record.lsn, |page| {
                            page.mark_delete(rid.slot);
                        })?;
                    }
                    LogRecordBody::ApplyDelete { rid, .. } => {
                        self.redo_on_page(rid.page_id, record.lsn, |page| {
                            page.apply_delete(rid.slot);
                        })?;
                    }
                    LogRecordBody::RollbackDelete { rid, .. } => {
                        self.redo_on_page(rid.page_id, record.lsn, |page| {
                            page.rollback_delete(rid.slot);
                        })?;
                    }
                    LogRecordBody::Update { rid, new_tuple, .. } => {
                        self.redo_on_page(rid.page_id, record.lsn, |page| {
                            page.update_tuple(rid.slot, new_tuple);
                        })?;
                    }
                    LogRecordBody::NewPage {
                        prev_page_id,
                        page_id,
                    } => {
                        let prev_page_id = *prev_page_id;
                        let page_id = *page_id;
                        let applied = self.redo_on_page(page_id, record.lsn, |page| {
                            page.init_table_page(page_id, prev_page_id);
                        })?;
                        if applied && prev_page_id != INVALID_PAGE_ID {
                            let frame = self.bpm.fetch_page(prev_page_id)?;
                            let relink = {
                                let mut page = frame.write();
                                if page.next_page_id() != page_id {
                                    page.set_next_page_id(page_id);
                                    true
                                } else {
                                    false
                                }
                            };
                            self.bpm.unpin_page(prev_page_id, relink);
                        }
                    }
                    LogRecordBody::Begin => {}
                    LogRecordBody::Commit | LogRecordBody::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                }
                pos += record.size as usize;
            }
            file_offset += LOG_BUFFER_SIZE as u64;
        }

        info!(
            "redo complete: {} loser transaction(s), max lsn {}",
            self.active_txn.len(),
            self.max_lsn
        );
        Ok(())
    }

    /// Walks each loser's `prev_lsn` chain backwards, applying the
    /// compensating operation for every data record.
    pub fn undo(&mut self) -> EngineResult<()> {
        let losers: Vec<(TxnId, Lsn)> = self.active_txn.iter().map(|(&t, &l)| (t, l)).collect();
        let mut buffer = vec![0u8; LOG_BUFFER_SIZE];

        for (txn_id, latest_lsn) in losers {
            debug!("undoing transaction {txn_id} from lsn {latest_lsn}");
            let mut lsn = latest_lsn;
            while lsn != INVALID_LSN {
                let offset = *self.lsn_offset.get(&lsn).ok_or_else(|| {
                    EngineError::Corrupted(format!("no file offset recorded for lsn {lsn}"))
                })?;
                if !self.disk.read_log(&mut buffer, offset)? {
                    return Err(EngineError::Corrupted(format!(
                        "log truncated at offset {offset}"
                    )));
                }
                let record = LogRecord::deserialize(&buffer)?.ok_or_else(|| {
                    EngineError::Corrupted(format!("unreadable record at offset {offset}"))
                })?;

                match &record.body {
                    LogRecordBody::Insert { rid, .. } => {
                        self.undo_on_page(rid.page_id, |page| {
                            page.apply_delete(rid.slot);
                        })?;
                    }
                    LogRecordBody::MarkDelete { rid, .. } => {
                        self.undo_on_page(rid.page_id, |page| {
                            page.rollback_delete(rid.slot);
                        })?;
                    }
                    LogRecordBody::ApplyDelete { rid, tuple } => {
                        self.undo_on_page(rid.page_id, |page| {
                            page.insert_tuple_at(rid.slot, tuple);
                        })?;
                    }
                    LogRecordBody::RollbackDelete { rid, .. } => {
                        self.undo_on_page(rid.page_id, |page| {
                            page.mark_delete(rid.slot);
                        })?;
                    }
                    LogRecordBody::Update { rid, old_tuple, .. } => {
                        self.undo_on_page(rid.page_id, |page| {
                            page.update_tuple(rid.slot, old_tuple);
                        })?;
                    }
                    LogRecordBody::NewPage { .. }
                    | LogRecordBody::Begin
                    | LogRecordBody::Commit
                    | LogRecordBody::Abort => {}
                }
                lsn = record.prev_lsn;
            }
        }

        self.active_txn.clear();
        info!("undo complete");
        Ok(())
    }

    /// Losers discovered by redo; empty once undo has run.
    pub fn active_txn(&self) -> &HashMap<TxnId, Lsn> {
        &self.active_txn
    }

    pub fn max_lsn(&self) -> Lsn {
        self.max_lsn
    }

    pub fn max_txn_id(&self) -> TxnId {
        self.max_txn_id
    }

    /// Applies `apply` iff the page has not seen this record yet, stamping
    /// the page with the record's LSN. Returns whether it applied.
    fn redo_on_page(
        &self,
        page_id: crate::PageId,
        lsn: Lsn,
        apply: impl FnOnce(&mut crate::Page),
    ) -> EngineResult<bool> {
        let frame = self.bpm.fetch_page(page_id)?;
        let applied = {
            let mut page = frame.write();
            if page.lsn() < lsn {
                apply(&mut page);
                page.set_lsn(lsn);
                true
            } else {
                false
            }
        };
        self.bpm.unpin_page(page_id, applied);
        Ok(applied)
    }

    /// Compensating operations run unconditionally; each is a no-op when
    /// its effect is already present, which makes undo idempotent.
    fn undo_on_page(
        &self,
        page_id: crate::PageId,
        apply: impl FnOnce(&mut crate::Page),
    ) -> EngineResult<()> {
        let frame = self.bpm.fetch_page(page_id)?;
        {
            let mut page = frame.write();
            apply(&mut page);
        }
        self.bpm.unpin_page(page_id, true);
        Ok(())
    }
}
