//! The write-ahead log manager.
//!
//! Two fixed-size buffers are swapped under a latch: appenders fill
//! `log_buffer` while a background thread writes `flush_buffer` to the log
//! file. The flush thread wakes on a buffer-swap signal, on a timer every
//! `LOG_TIMEOUT`, or on a forced flush from the buffer pool.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error};

use crate::disk::DiskManager;
use crate::log_record::LogRecord;
use crate::{Lsn, INVALID_LSN, LOG_BUFFER_SIZE, LOG_TIMEOUT};

struct LogBuffers {
    log_buffer: Vec<u8>,
    offset: usize,
    /// Highest LSN currently serialized into `log_buffer`.
    last_lsn: Lsn,
    flush_buffer: Vec<u8>,
    flush_len: usize,
    /// Highest LSN in `flush_buffer`; the persistent LSN is raised to this
    /// after a successful write.
    flush_max_lsn: Lsn,
    need_flush: bool,
    flush_in_progress: bool,
}

pub struct LogManager {
    disk: Arc<DiskManager>,
    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    buffers: Mutex<LogBuffers>,
    /// Wakes the flush thread.
    flush_cv: Condvar,
    /// Wakes force-flush callers and appenders waiting out a swap.
    flushed_cv: Condvar,
    enabled: AtomicBool,
    flush_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            // LSN 0 is never assigned: a zeroed page header reads LSN 0,
            // which must always compare below every real record.
            next_lsn: AtomicI32::new(1),
            persistent_lsn: AtomicI32::new(INVALID_LSN),
            buffers: Mutex::new(LogBuffers {
                log_buffer: vec![0u8; LOG_BUFFER_SIZE],
                offset: 0,
                last_lsn: INVALID_LSN,
                flush_buffer: vec![0u8; LOG_BUFFER_SIZE],
                flush_len: 0,
                flush_max_lsn: INVALID_LSN,
                need_flush: false,
                flush_in_progress: false,
            }),
            flush_cv: Condvar::new(),
            flushed_cv: Condvar::new(),
            enabled: AtomicBool::new(false),
            flush_thread: Mutex::new(None),
        }
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Every record with an LSN at or below this is on stable storage.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// Recovery advances the counter past everything found in the log file.
    pub fn reset_lsn(&self, next_lsn: Lsn) {
        self.next_lsn.store(next_lsn, Ordering::SeqCst);
        self.persistent_lsn
            .store(next_lsn.saturating_sub(1).max(INVALID_LSN), Ordering::SeqCst);
    }

    /// Assigns the next LSN to `record` and serializes it into the log
    /// buffer, swapping buffers first when the record does not fit.
    pub fn append(&self, record: &mut LogRecord) -> Lsn {
        let mut buffers = self.buffers.lock().unwrap();

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        record.lsn = lsn;
        let len = record.serialized_size();
        debug_assert!(len <= LOG_BUFFER_SIZE, "log record larger than a block");

        while buffers.offset + len > LOG_BUFFER_SIZE {
            if buffers.need_flush || buffers.flush_in_progress {
                buffers = self.flushed_cv.wait(buffers).unwrap();
            } else {
                Self::swap_buffers(&mut buffers);
                self.flush_cv.notify_all();
            }
        }

        let offset = buffers.offset;
        let mut dst = &mut buffers.log_buffer[offset..offset + len];
        record.serialize_into(&mut dst);
        buffers.offset += len;
        buffers.last_lsn = lsn;
        lsn
    }

    /// Blocks the caller until every record with LSN ≤ `up_to` is on disk.
    pub fn flush(&self, up_to: Lsn) {
        if up_to == INVALID_LSN {
            return;
        }
        while self.persistent_lsn() < up_to {
            let mut buffers = self.buffers.lock().unwrap();
            if self.persistent_lsn() >= up_to {
                return;
            }

            if !self.enabled.load(Ordering::SeqCst) {
                // No flush thread (recovery-time or shutdown): do it inline.
                if buffers.offset > 0 && !buffers.need_flush {
                    Self::swap_buffers(&mut buffers);
                }
                if buffers.need_flush {
                    self.write_flush_buffer_locked(&mut buffers);
                    continue;
                }
                return;
            }

            if !buffers.need_flush && !buffers.flush_in_progress {
                if buffers.offset == 0 {
                    // Nothing buffered anywhere; the LSN was never appended.
                    return;
                }
                Self::swap_buffers(&mut buffers);
                self.flush_cv.notify_all();
            }
            let (guard, _) = self
                .flushed_cv
                .wait_timeout(buffers, Duration::from_millis(20))
                .unwrap();
            drop(guard);
        }
    }

    /// Starts the background flush thread. The thread holds only a weak
    /// handle so dropping the manager shuts it down.
    pub fn run_flush_thread(self: &Arc<Self>) {
        let mut handle = self.flush_thread.lock().unwrap();
        if handle.is_some() {
            return;
        }
        self.enabled.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        *handle = Some(thread::spawn(move || loop {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if !manager.enabled.load(Ordering::SeqCst) {
                return;
            }
            manager.flush_iteration();
        }));
        debug!("log flush thread started");
    }

    /// Stops and joins the flush thread, then drains whatever is buffered.
    pub fn stop_flush_thread(&self) {
        let handle = {
            let mut slot = self.flush_thread.lock().unwrap();
            slot.take()
        };
        self.enabled.store(false, Ordering::SeqCst);
        self.flush_cv.notify_all();
        self.flushed_cv.notify_all();
        if let Some(handle) = handle {
            let _ = handle.join();
            debug!("log flush thread stopped");
        }

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.offset > 0 && !buffers.need_flush {
            Self::swap_buffers(&mut buffers);
        }
        if buffers.need_flush {
            self.write_flush_buffer_locked(&mut buffers);
        }
    }

    /// One wait-and-flush cycle of the background thread.
    fn flush_iteration(&self) {
        let mut buffers = self.buffers.lock().unwrap();
        if !buffers.need_flush {
            let (guard, _) = self.flush_cv.wait_timeout(buffers, LOG_TIMEOUT).unwrap();
            buffers = guard;
            // Timer wakeup: swap a non-empty buffer so it gets written.
            if !buffers.need_flush && buffers.offset > 0 && !buffers.flush_in_progress {
                Self::swap_buffers(&mut buffers);
            }
        }
        if buffers.need_flush && !buffers.flush_in_progress {
            buffers.need_flush = false;
            buffers.flush_in_progress = true;
            let len = buffers.flush_len;
            let max_lsn = buffers.flush_max_lsn;
            let mut block = std::mem::take(&mut buffers.flush_buffer);
            drop(buffers);

            if len > 0 {
                block[len..].fill(0);
                match self.disk.write_log(&block) {
                    Ok(()) => {
                        if max_lsn != INVALID_LSN {
                            self.persistent_lsn.fetch_max(max_lsn, Ordering::SeqCst);
                        }
                    }
                    Err(e) => error!("log flush failed: {e}"),
                }
            }

            let mut buffers = self.buffers.lock().unwrap();
            buffers.flush_buffer = block;
            buffers.flush_in_progress = false;
            self.flushed_cv.notify_all();
        }
    }

    fn swap_buffers(buffers: &mut LogBuffers) {
        std::mem::swap(&mut buffers.log_buffer, &mut buffers.flush_buffer);
        buffers.flush_len = buffers.offset;
        buffers.flush_max_lsn = buffers.last_lsn;
        buffers.offset = 0;
        buffers.last_lsn = INVALID_LSN;
        buffers.need_flush = true;
    }

    fn write_flush_buffer_locked(&self, buffers: &mut LogBuffers) {
        let len = buffers.flush_len;
        let max_lsn = buffers.flush_max_lsn;
        buffers.need_flush = false;
        if len == 0 {
            self.flushed_cv.notify_all();
            return;
        }
        buffers.flush_buffer[len..].fill(0);
        match self.disk.write_log(&buffers.flush_buffer) {
            Ok(()) => {
                if max_lsn != INVALID_LSN {
                    self.persistent_lsn.fetch_max(max_lsn, Ordering::SeqCst);
                }
            }
            Err(e) => error!("log flush failed: {e}"),
        }
        self.flushed_cv.notify_all();
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.stop_flush_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_record::{LogRecord, LogRecordBody};
    use crate::Rid;
    use crate::Tuple;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Arc<DiskManager>, Arc<LogManager>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::open(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
        );
        let manager = Arc::new(LogManager::new(disk.clone()));
        (dir, disk, manager)
    }

    #[test]
    fn lsns_are_monotonic() {
        let (_dir, _disk, manager) = setup();
        let mut a = LogRecord::new_begin(1);
        let mut b = LogRecord::new_commit(1, 1);
        assert_eq!(manager.append(&mut a), 1);
        assert_eq!(manager.append(&mut b), 2);
        assert_eq!(manager.next_lsn(), 3);
    }

    #[test]
    fn force_flush_raises_persistent_lsn() {
        let (_dir, disk, manager) = setup();
        manager.run_flush_thread();

        let mut record = LogRecord::new_begin(1);
        let lsn = manager.append(&mut record);
        manager.flush(lsn);
        assert!(manager.persistent_lsn() >= lsn);
        assert_eq!(disk.log_size().unwrap() as usize % LOG_BUFFER_SIZE, 0);

        manager.stop_flush_thread();
    }

    #[test]
    fn buffer_swap_on_overflow() {
        let (_dir, disk, manager) = setup();
        manager.run_flush_thread();

        // Large tuples force a swap well before a thousand appends.
        let payload = Tuple::new(vec![7u8; 900]);
        let mut last = INVALID_LSN;
        for i in 0..40 {
            let mut record =
                LogRecord::new_insert(1, last, Rid::new(i, 0), payload.clone());
            last = manager.append(&mut record);
        }
        manager.flush(last);
        assert!(manager.persistent_lsn() >= last);

        // Every flushed block is exactly one buffer long.
        assert_eq!(disk.log_size().unwrap() as usize % LOG_BUFFER_SIZE, 0);
        manager.stop_flush_thread();
    }

    #[test]
    fn flushed_blocks_deserialize_in_order() {
        let (_dir, disk, manager) = setup();
        manager.run_flush_thread();

        let mut last = INVALID_LSN;
        for _ in 0..10 {
            let mut record = LogRecord::new_begin(3);
            record.prev_lsn = last;
            last = manager.append(&mut record);
        }
        manager.flush(last);
        manager.stop_flush_thread();

        let mut buf = vec![0u8; LOG_BUFFER_SIZE];
        let mut expected = 1;
        let mut offset = 0u64;
        while disk.read_log(&mut buf, offset).unwrap() {
            let mut pos = 0;
            while let Some(record) = LogRecord::deserialize(&buf[pos..]).unwrap() {
                assert_eq!(record.lsn, expected);
                assert!(matches!(record.body, LogRecordBody::Begin));
                expected += 1;
                pos += record.size as usize;
            }
            offset += LOG_BUFFER_SIZE as u64;
        }
        assert_eq!(expected, 11);
    }
}
