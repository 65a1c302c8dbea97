use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::{PageId, PAGE_SIZE};

/// Reads and writes fixed-size pages in the data file and appends blocks to
/// the log file. Fresh page identifiers are vended by append; deallocation
/// is a no-op in this design.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(db_path: P, log_path: P) -> io::Result<Self> {
        let db_ref = db_path.as_ref();
        if let Some(parent) = db_ref.parent() {
            create_dir_all(parent)?;
        }
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_ref)?;

        let log_ref = log_path.as_ref();
        if let Some(parent) = log_ref.parent() {
            create_dir_all(parent)?;
        }
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(log_ref)?;

        let file_size = db_file.metadata()?.len();
        let file_pages = (file_size / PAGE_SIZE as u64) as PageId;
        // Page 0 is reserved for the header page, so allocation starts at 1.
        let next_page_id = file_pages.max(1);
        debug!("opened data file ({file_size} bytes, {file_pages} pages) at {db_ref:?}");

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicI32::new(next_page_id),
        })
    }

    /// Reads one page into `buf`. A page beyond the end of the file (or a
    /// short read at the tail) comes back zero-filled.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
        let mut file = self.db_file.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        if offset >= file.metadata()?.len() {
            buf.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf[read..].fill(0);
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> io::Result<()> {
        let mut file = self.db_file.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(())
    }

    /// Vends a fresh page identifier. Pages are allocated by append.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Deallocation is a no-op; freed pages are never reused.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    pub fn num_pages(&self) -> PageId {
        self.next_page_id.load(Ordering::SeqCst)
    }

    /// Appends one block to the log file. The log is append-only; callers
    /// hand over complete, zero-padded blocks.
    pub fn write_log(&self, buf: &[u8]) -> io::Result<()> {
        let mut file = self.log_file.lock().unwrap();
        file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(())
    }

    /// Reads up to `buf.len()` log bytes starting at `offset`, zero-filling
    /// past end of file. Returns `false` when `offset` is at or beyond EOF.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> io::Result<bool> {
        let mut file = self.log_file.lock().unwrap();
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf[read..].fill(0);
        Ok(true)
    }

    pub fn log_size(&self) -> io::Result<u64> {
        Ok(self.log_file.lock().unwrap().metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_round_trip() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("test.db"), dir.path().join("test.log")).unwrap();

        let page_id = dm.allocate_page();
        assert_eq!(page_id, 1);

        let mut buf = [0u8; PAGE_SIZE];
        buf[0..5].copy_from_slice(b"hello");
        dm.write_page(page_id, &buf).unwrap();

        let mut out = [0xffu8; PAGE_SIZE];
        dm.read_page(page_id, &mut out).unwrap();
        assert_eq!(&out[0..5], b"hello");
        assert_eq!(out[5], 0);
    }

    #[test]
    fn read_past_eof_zero_fills() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("test.db"), dir.path().join("test.log")).unwrap();

        let mut out = [0xffu8; PAGE_SIZE];
        dm.read_page(99, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn log_is_append_only() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("test.db"), dir.path().join("test.log")).unwrap();

        dm.write_log(b"aaaa").unwrap();
        dm.write_log(b"bbbb").unwrap();

        let mut buf = [0u8; 8];
        assert!(dm.read_log(&mut buf, 0).unwrap());
        assert_eq!(&buf, b"aaaabbbb");
        assert!(!dm.read_log(&mut buf, 8).unwrap());
    }

    #[test]
    fn allocation_survives_reopen() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        let wal = dir.path().join("test.log");
        {
            let dm = DiskManager::open(&db, &wal).unwrap();
            let id = dm.allocate_page();
            dm.write_page(id, &[7u8; PAGE_SIZE]).unwrap();
        }
        let dm = DiskManager::open(&db, &wal).unwrap();
        assert_eq!(dm.allocate_page(), 2);
    }
}
