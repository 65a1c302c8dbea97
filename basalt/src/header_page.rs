//! The catalog header page.
//!
//! Page 0 of the data file stores `(index name, root page id)` records so a
//! B+ tree's root can be found again after its page changes. Names are
//! null-padded to a fixed width.

use crate::page::Page;
use crate::PageId;

const RECORD_COUNT_OFFSET: usize = 0;
// Offset 4 holds the page LSN slot shared by every page kind.
const RECORDS_OFFSET: usize = 8;

/// Fixed width of an index name, including the null padding.
pub const MAX_NAME_LEN: usize = 32;
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;

const MAX_RECORDS: usize = (crate::PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

impl Page {
    fn record_count(&self) -> i32 {
        self.read_at(RECORD_COUNT_OFFSET)
    }

    fn set_record_count(&mut self, count: i32) {
        self.write_at(RECORD_COUNT_OFFSET, count);
    }

    fn record_name(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let raw = self.bytes(offset, MAX_NAME_LEN);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &raw[..end]
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count() as usize).find(|&i| self.record_name(i) == name.as_bytes())
    }

    /// Adds a `(name, root_page_id)` record. Fails on duplicates, on names
    /// longer than the fixed width and on a full page.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() >= MAX_NAME_LEN || name.is_empty() {
            return false;
        }
        let count = self.record_count() as usize;
        if count >= MAX_RECORDS || self.find_record(name).is_some() {
            return false;
        }
        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        self.bytes_mut(offset, MAX_NAME_LEN).fill(0);
        self.bytes_mut(offset, name.len()).copy_from_slice(name.as_bytes());
        self.write_at(offset + MAX_NAME_LEN, root_page_id);
        self.set_record_count(count as i32 + 1);
        true
    }

    /// Rewrites the root page id of an existing record.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        self.write_at(offset + MAX_NAME_LEN, root_page_id);
        true
    }

    /// Looks up the root page id registered under `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let index = self.find_record(name)?;
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        Some(self.read_at(offset + MAX_NAME_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HEADER_PAGE_ID, INVALID_PAGE_ID};

    #[test]
    fn insert_update_lookup() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(page.insert_record("orders_pk", 7));
        assert!(page.insert_record("users_pk", INVALID_PAGE_ID));
        assert!(!page.insert_record("orders_pk", 9));

        assert_eq!(page.get_root_id("orders_pk"), Some(7));
        assert_eq!(page.get_root_id("users_pk"), Some(INVALID_PAGE_ID));
        assert_eq!(page.get_root_id("missing"), None);

        assert!(page.update_record("users_pk", 12));
        assert_eq!(page.get_root_id("users_pk"), Some(12));
        assert!(!page.update_record("missing", 3));
    }

    #[test]
    fn name_length_is_bounded() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let long = "x".repeat(MAX_NAME_LEN);
        assert!(!page.insert_record(&long, 1));
        assert!(!page.insert_record("", 1));
    }
}
