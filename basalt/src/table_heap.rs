//! A heap file: a doubly linked list of slotted table pages.
//!
//! Every mutation writes its log record, stamps the page with the record's
//! LSN, marks the page dirty on unpin and records an undo entry on the
//! acting transaction.

use std::sync::Arc;

use log::debug;

use crate::buffer_pool::BufferPoolManager;
use crate::error::{EngineError, EngineResult};
use crate::log_manager::LogManager;
use crate::log_record::LogRecord;
use crate::transaction::{TableWriteRecord, Transaction, WriteType};
use crate::tuple::Tuple;
use crate::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};

/// Anything bigger can never fit beside a page header and one slot.
const MAX_TUPLE_SIZE: usize = PAGE_SIZE - 32;

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Creates a heap with one empty page.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        txn: &Transaction,
    ) -> EngineResult<Arc<TableHeap>> {
        let frame = bpm.new_page()?;
        let first_page_id = frame.page_id();
        {
            let mut page = frame.write();
            page.init_table_page(first_page_id, INVALID_PAGE_ID);
            let mut record = LogRecord::new_new_page(
                txn.id(),
                txn.prev_lsn(),
                INVALID_PAGE_ID,
                first_page_id,
            );
            let lsn = log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            page.set_lsn(lsn);
        }
        bpm.unpin_page(first_page_id, true);
        debug!("created table heap rooted at page {first_page_id}");
        Ok(Arc::new(TableHeap {
            bpm,
            log_manager,
            first_page_id,
        }))
    }

    /// Opens an existing heap by its first page.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        first_page_id: PageId,
    ) -> Arc<TableHeap> {
        Arc::new(TableHeap {
            bpm,
            log_manager,
            first_page_id,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Inserts a tuple, appending a new page to the chain when no existing
    /// page has room.
    pub fn insert_tuple(
        self: &Arc<Self>,
        txn: &Transaction,
        tuple: &Tuple,
    ) -> EngineResult<Rid> {
        if tuple.len() > MAX_TUPLE_SIZE {
            return Err(EngineError::TupleTooLarge { size: tuple.len() });
        }

        let mut page_id = self.first_page_id;
        loop {
            let frame = self.bpm.fetch_page(page_id)?;
            let slot = {
                let mut page = frame.write();
                match page.insert_tuple(tuple) {
                    Some(slot) => {
                        let rid = Rid::new(page_id, slot);
                        let mut record = LogRecord::new_insert(
                            txn.id(),
                            txn.prev_lsn(),
                            rid,
                            tuple.clone(),
                        );
                        let lsn = self.log_manager.append(&mut record);
                        txn.set_prev_lsn(lsn);
                        page.set_lsn(lsn);
                        Some(slot)
                    }
                    None => None,
                }
            };

            if let Some(slot) = slot {
                self.bpm.unpin_page(page_id, true);
                let rid = Rid::new(page_id, slot);
                txn.append_table_write(TableWriteRecord {
                    rid,
                    wtype: WriteType::Insert,
                    tuple: Tuple::default(),
                    table: Arc::clone(self),
                });
                return Ok(rid);
            }

            let next = frame.read().next_page_id();
            if next != INVALID_PAGE_ID {
                self.bpm.unpin_page(page_id, false);
                page_id = next;
                continue;
            }

            // Tail page is full: append a fresh page to the chain.
            let new_frame = self.bpm.new_page().map_err(|e| {
                self.bpm.unpin_page(page_id, false);
                e
            })?;
            let new_page_id = new_frame.page_id();
            {
                let mut new_page = new_frame.write();
                new_page.init_table_page(new_page_id, page_id);
                let mut record = LogRecord::new_new_page(
                    txn.id(),
                    txn.prev_lsn(),
                    page_id,
                    new_page_id,
                );
                let lsn = self.log_manager.append(&mut record);
                txn.set_prev_lsn(lsn);
                new_page.set_lsn(lsn);
            }
            frame.write().set_next_page_id(new_page_id);
            self.bpm.unpin_page(page_id, true);
            self.bpm.unpin_page(new_page_id, true);
            page_id = new_page_id;
        }
    }

    /// Flags a tuple deleted; the physical delete happens at commit.
    pub fn mark_delete(self: &Arc<Self>, txn: &Transaction, rid: Rid) -> EngineResult<bool> {
        let frame = self.bpm.fetch_page(rid.page_id)?;
        let old_tuple = {
            let mut page = frame.write();
            let Some(old_tuple) = page.get_tuple(rid.slot) else {
                drop(page);
                self.bpm.unpin_page(rid.page_id, false);
                return Ok(false);
            };
            page.mark_delete(rid.slot);
            let mut record = LogRecord::new_mark_delete(
                txn.id(),
                txn.prev_lsn(),
                rid,
                old_tuple.clone(),
            );
            let lsn = self.log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            page.set_lsn(lsn);
            old_tuple
        };
        self.bpm.unpin_page(rid.page_id, true);
        txn.append_table_write(TableWriteRecord {
            rid,
            wtype: WriteType::Delete,
            tuple: old_tuple,
            table: Arc::clone(self),
        });
        Ok(true)
    }

    /// Physically removes a tuple. Runs at commit (for marked deletes) and
    /// when an insert is rolled back, so it accepts marked slots too.
    pub fn apply_delete(&self, txn: &Transaction, rid: Rid) -> EngineResult<bool> {
        let frame = self.bpm.fetch_page(rid.page_id)?;
        let applied = {
            let mut page = frame.write();
            let Some(old_tuple) = page.get_tuple_raw(rid.slot) else {
                drop(page);
                self.bpm.unpin_page(rid.page_id, false);
                return Ok(false);
            };
            page.apply_delete(rid.slot);
            let mut record = LogRecord::new_apply_delete(
                txn.id(),
                txn.prev_lsn(),
                rid,
                old_tuple,
            );
            let lsn = self.log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            page.set_lsn(lsn);
            true
        };
        self.bpm.unpin_page(rid.page_id, true);
        Ok(applied)
    }

    /// Clears a delete mark during rollback.
    pub fn rollback_delete(&self, txn: &Transaction, rid: Rid) -> EngineResult<bool> {
        let frame = self.bpm.fetch_page(rid.page_id)?;
        let rolled_back = {
            let mut page = frame.write();
            if !page.rollback_delete(rid.slot) {
                drop(page);
                self.bpm.unpin_page(rid.page_id, false);
                return Ok(false);
            }
            let tuple = page.get_tuple(rid.slot).unwrap_or_default();
            let mut record =
                LogRecord::new_rollback_delete(txn.id(), txn.prev_lsn(), rid, tuple);
            let lsn = self.log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            page.set_lsn(lsn);
            true
        };
        self.bpm.unpin_page(rid.page_id, true);
        Ok(rolled_back)
    }

    /// Replaces a tuple in place.
    pub fn update_tuple(
        self: &Arc<Self>,
        txn: &Transaction,
        rid: Rid,
        new_tuple: &Tuple,
    ) -> EngineResult<bool> {
        let frame = self.bpm.fetch_page(rid.page_id)?;
        let old_tuple = {
            let mut page = frame.write();
            let Some(old_tuple) = page.update_tuple(rid.slot, new_tuple) else {
                drop(page);
                self.bpm.unpin_page(rid.page_id, false);
                return Ok(false);
            };
            let mut record = LogRecord::new_update(
                txn.id(),
                txn.prev_lsn(),
                rid,
                old_tuple.clone(),
                new_tuple.clone(),
            );
            let lsn = self.log_manager.append(&mut record);
            txn.set_prev_lsn(lsn);
            page.set_lsn(lsn);
            old_tuple
        };
        self.bpm.unpin_page(rid.page_id, true);
        txn.append_table_write(TableWriteRecord {
            rid,
            wtype: WriteType::Update,
            tuple: old_tuple,
            table: Arc::clone(self),
        });
        Ok(true)
    }

    pub fn get_tuple(&self, _txn: &Transaction, rid: Rid) -> EngineResult<Option<Tuple>> {
        let frame = self.bpm.fetch_page(rid.page_id)?;
        let tuple = frame.read().get_tuple(rid.slot);
        self.bpm.unpin_page(rid.page_id, false);
        Ok(tuple)
    }

    /// Iterates every live tuple in heap order.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator {
            heap: Arc::clone(self),
            page_id: self.first_page_id,
            next_slot: 0,
            done: false,
        }
    }
}

pub struct TableIterator {
    heap: Arc<TableHeap>,
    page_id: PageId,
    next_slot: u32,
    done: bool,
}

impl Iterator for TableIterator {
    type Item = EngineResult<(Rid, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let frame = match self.heap.bpm.fetch_page(self.page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let page = frame.read();
            let mut slot = if self.next_slot == 0 {
                page.first_tuple_slot()
            } else {
                page.next_tuple_slot(self.next_slot - 1)
            };
            // Skip to the requested position within the page.
            while let Some(s) = slot {
                if s >= self.next_slot {
                    break;
                }
                slot = page.next_tuple_slot(s);
            }

            if let Some(s) = slot {
                let tuple = page.get_tuple(s).expect("live slot has a tuple");
                let rid = Rid::new(self.page_id, s);
                drop(page);
                self.heap.bpm.unpin_page(self.page_id, false);
                self.next_slot = s + 1;
                return Some(Ok((rid, tuple)));
            }

            let next_page = page.next_page_id();
            drop(page);
            self.heap.bpm.unpin_page(self.page_id, false);
            if next_page == INVALID_PAGE_ID {
                self.done = true;
                return None;
            }
            self.page_id = next_page;
            self.next_slot = 0;
        }
    }
}
