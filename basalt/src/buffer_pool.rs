//! Manages the buffer pool, a fixed set of in-memory frames caching disk pages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use crate::disk::DiskManager;
use crate::error::{EngineError, EngineResult};
use crate::log_manager::LogManager;
use crate::replacer::LruReplacer;
use crate::{FrameId, Page, PageId, INVALID_PAGE_ID};

/// A single frame in the buffer pool. Holds at most one page's contents;
/// pin count and dirty bit live in the pool's bookkeeping.
pub struct Frame {
    page: RwLock<Page>,
}

impl Frame {
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write().unwrap()
    }

    pub fn page_id(&self) -> PageId {
        self.read().id
    }
}

#[derive(Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn vacant() -> Self {
        FrameMeta {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: LruReplacer,
    meta: Vec<FrameMeta>,
}

/// The buffer pool manager.
///
/// A frame is always in exactly one of three states: on the free list,
/// pinned (`pin_count > 0`), or unpinned-evictable (in the replacer).
pub struct BufferPoolManager {
    frames: Vec<Arc<Frame>>,
    inner: Mutex<PoolInner>,
    disk: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        disk: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        for i in (0..pool_size).rev() {
            free_list.push(i);
        }
        for _ in 0..pool_size {
            frames.push(Arc::new(Frame {
                page: RwLock::new(Page::new(INVALID_PAGE_ID)),
            }));
        }
        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                meta: vec![FrameMeta::vacant(); pool_size],
            }),
            disk,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the frame holding `page_id`, reading it from disk and
    /// evicting a victim if necessary; the returned frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> EngineResult<Arc<Frame>> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            inner.meta[frame_id].pin_count += 1;
            inner.replacer.pin(frame_id);
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self.acquire_victim(&mut inner)?;

        inner.page_table.insert(page_id, frame_id);
        inner.meta[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };

        let frame = &self.frames[frame_id];
        let read_result = {
            let mut page = frame.write();
            page.id = page_id;
            self.disk.read_page(page_id, &mut page.data)
        };
        if let Err(e) = read_result {
            inner.page_table.remove(&page_id);
            inner.meta[frame_id] = FrameMeta::vacant();
            inner.free_list.push(frame_id);
            return Err(e.into());
        }

        Ok(frame.clone())
    }

    /// Allocates a fresh page on disk and pins a zeroed frame for it.
    pub fn new_page(&self) -> EngineResult<Arc<Frame>> {
        let mut inner = self.inner.lock().unwrap();

        let page_id = self.disk.allocate_page();
        let frame_id = self.acquire_victim(&mut inner)?;

        inner.page_table.insert(page_id, frame_id);
        inner.meta[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };

        let frame = &self.frames[frame_id];
        frame.write().reset(page_id);
        Ok(frame.clone())
    }

    /// Decrements the pin count and ORs in the dirty bit. Returns `false`
    /// if the page is not resident or its pin count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            warn!("unpin of non-resident page {page_id}");
            return false;
        };
        let meta = &mut inner.meta[frame_id];
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page to disk regardless of its pin count.
    /// `INVALID_PAGE_ID` and non-resident pages are ignored.
    pub fn flush_page(&self, page_id: PageId) -> EngineResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        {
            let page = self.frames[frame_id].read();
            self.enforce_wal(page.lsn());
            self.disk.write_page(page_id, &page.data)?;
        }
        inner.meta[frame_id].is_dirty = false;
        Ok(true)
    }

    /// Deallocates a page. Fails (returns `false`) when the page is pinned;
    /// a non-resident page has nothing to clear and succeeds.
    pub fn delete_page(&self, page_id: PageId) -> EngineResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        self.disk.deallocate_page(page_id);

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        if inner.meta[frame_id].pin_count > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        inner.meta[frame_id] = FrameMeta::vacant();
        self.frames[frame_id].write().reset(INVALID_PAGE_ID);
        inner.free_list.push(frame_id);
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> EngineResult<()> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// The pin count of a resident page, for tests and assertions.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| inner.meta[frame_id].pin_count)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.lock().unwrap().page_table.contains_key(&page_id)
    }

    /// Picks a reusable frame: free list first, then the replacer. A dirty
    /// victim is written back (behind the write-ahead hook) before reuse.
    fn acquire_victim(&self, inner: &mut PoolInner) -> EngineResult<FrameId> {
        let frame_id = if let Some(frame_id) = inner.free_list.pop() {
            frame_id
        } else if let Some(frame_id) = inner.replacer.victim() {
            frame_id
        } else {
            return Err(EngineError::BufferPoolExhausted);
        };

        let old = inner.meta[frame_id];
        if old.page_id != INVALID_PAGE_ID {
            if old.is_dirty {
                let page = self.frames[frame_id].read();
                self.enforce_wal(page.lsn());
                if let Err(e) = self.disk.write_page(old.page_id, &page.data) {
                    drop(page);
                    inner.replacer.unpin(frame_id);
                    return Err(e.into());
                }
            }
            inner.page_table.remove(&old.page_id);
        }
        Ok(frame_id)
    }

    /// The write-ahead invariant: every log record up to and including the
    /// page's LSN must be on stable storage before the page itself is.
    fn enforce_wal(&self, page_lsn: crate::Lsn) {
        if let Some(log_manager) = &self.log_manager {
            if page_lsn > log_manager.persistent_lsn() {
                log_manager.flush(page_lsn);
            }
        }
    }
}
