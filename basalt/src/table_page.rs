//! Slotted-page layout for table heap files.
//!
//! Header, then a slot array growing down the page, then tuple data growing
//! up from the end. Deleting is a two-step affair: `mark_delete` flags the
//! slot, `apply_delete` physically removes the bytes and compacts,
//! `rollback_delete` clears the flag.

use crate::page::Page;
use crate::tuple::Tuple;
use crate::{PageId, SlotId, INVALID_PAGE_ID, PAGE_SIZE};

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct TablePageHeader {
    page_id: PageId,
    lsn: crate::Lsn,
    prev_page_id: PageId,
    next_page_id: PageId,
    free_space_pointer: u32,
    tuple_count: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct TupleSlot {
    offset: u32,
    size: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<TablePageHeader>();
const SLOT_SIZE: usize = std::mem::size_of::<TupleSlot>();

/// High bit of a slot's size field marks a logically deleted tuple.
const DELETE_FLAG: u32 = 1 << 31;

fn slot_offset(slot: SlotId) -> usize {
    HEADER_SIZE + slot as usize * SLOT_SIZE
}

impl Page {
    fn table_header(&self) -> TablePageHeader {
        self.read_at(0)
    }

    fn set_table_header(&mut self, header: TablePageHeader) {
        self.write_at(0, header);
    }

    fn slot(&self, slot: SlotId) -> TupleSlot {
        self.read_at(slot_offset(slot))
    }

    fn set_slot(&mut self, slot: SlotId, value: TupleSlot) {
        self.write_at(slot_offset(slot), value);
    }

    /// Formats this page as an empty table page.
    pub fn init_table_page(&mut self, page_id: PageId, prev_page_id: PageId) {
        self.set_table_header(TablePageHeader {
            page_id,
            lsn: 0,
            prev_page_id,
            next_page_id: INVALID_PAGE_ID,
            free_space_pointer: PAGE_SIZE as u32,
            tuple_count: 0,
        });
    }

    pub fn table_page_id(&self) -> PageId {
        self.table_header().page_id
    }

    pub fn prev_page_id(&self) -> PageId {
        self.table_header().prev_page_id
    }

    pub fn next_page_id(&self) -> PageId {
        self.table_header().next_page_id
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        let mut header = self.table_header();
        header.next_page_id = next;
        self.set_table_header(header);
    }

    pub fn set_prev_page_id(&mut self, prev: PageId) {
        let mut header = self.table_header();
        header.prev_page_id = prev;
        self.set_table_header(header);
    }

    pub fn tuple_count(&self) -> u32 {
        self.table_header().tuple_count
    }

    fn free_space(&self) -> usize {
        let header = self.table_header();
        header.free_space_pointer as usize - HEADER_SIZE
            - header.tuple_count as usize * SLOT_SIZE
    }

    /// Inserts a tuple, reusing an empty slot when one exists. Returns the
    /// slot number, or `None` when the page cannot hold the tuple.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Option<SlotId> {
        if tuple.is_empty() {
            return None;
        }
        let header = self.table_header();
        let mut target = None;
        for i in 0..header.tuple_count {
            if self.slot(i).size == 0 {
                target = Some(i);
                break;
            }
        }
        let needs_new_slot = target.is_none();
        let needed = tuple.len() + if needs_new_slot { SLOT_SIZE } else { 0 };
        if self.free_space() < needed {
            return None;
        }
        let slot = target.unwrap_or(header.tuple_count);
        self.place_tuple(slot, tuple, needs_new_slot);
        Some(slot)
    }

    /// Inserts a tuple at a specific slot; recovery replays inserts
    /// verbatim with the RID from the log.
    pub fn insert_tuple_at(&mut self, slot: SlotId, tuple: &Tuple) -> bool {
        if tuple.is_empty() {
            return false;
        }
        let header = self.table_header();
        if slot < header.tuple_count {
            if self.slot(slot).size != 0 {
                return false;
            }
            if self.free_space() < tuple.len() {
                return false;
            }
            self.place_tuple(slot, tuple, false);
            return true;
        }
        let new_slots = (slot + 1 - header.tuple_count) as usize;
        if self.free_space() < tuple.len() + new_slots * SLOT_SIZE {
            return false;
        }
        let mut header = self.table_header();
        while header.tuple_count <= slot {
            self.set_slot(header.tuple_count, TupleSlot { offset: 0, size: 0 });
            header.tuple_count += 1;
        }
        self.set_table_header(header);
        self.place_tuple(slot, tuple, false);
        true
    }

    fn place_tuple(&mut self, slot: SlotId, tuple: &Tuple, new_slot: bool) {
        let mut header = self.table_header();
        let offset = header.free_space_pointer as usize - tuple.len();
        self.bytes_mut(offset, tuple.len()).copy_from_slice(tuple.data());
        header.free_space_pointer = offset as u32;
        if new_slot {
            header.tuple_count += 1;
        }
        self.set_table_header(header);
        self.set_slot(
            slot,
            TupleSlot {
                offset: offset as u32,
                size: tuple.len() as u32,
            },
        );
    }

    /// Flags a tuple as deleted without reclaiming its space.
    pub fn mark_delete(&mut self, slot: SlotId) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let mut entry = self.slot(slot);
        if entry.size == 0 || entry.size & DELETE_FLAG != 0 {
            return false;
        }
        entry.size |= DELETE_FLAG;
        self.set_slot(slot, entry);
        true
    }

    /// Clears the delete flag set by `mark_delete`.
    pub fn rollback_delete(&mut self, slot: SlotId) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let mut entry = self.slot(slot);
        if entry.size == 0 || entry.size & DELETE_FLAG == 0 {
            return false;
        }
        entry.size &= !DELETE_FLAG;
        self.set_slot(slot, entry);
        true
    }

    /// Physically removes the tuple and compacts the data area. Works on
    /// both marked and unmarked tuples; undo of an insert comes through
    /// here directly.
    pub fn apply_delete(&mut self, slot: SlotId) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let entry = self.slot(slot);
        if entry.size == 0 {
            return false;
        }
        let size = (entry.size & !DELETE_FLAG) as usize;
        let offset = entry.offset as usize;

        let mut header = self.table_header();
        let fsp = header.free_space_pointer as usize;
        self.data.copy_within(fsp..offset, fsp + size);
        header.free_space_pointer = (fsp + size) as u32;
        self.set_table_header(header);

        for i in 0..self.tuple_count() {
            let mut other = self.slot(i);
            if other.size != 0 && (other.offset as usize) < offset {
                other.offset += size as u32;
                self.set_slot(i, other);
            }
        }
        self.set_slot(slot, TupleSlot { offset: 0, size: 0 });
        true
    }

    /// Replaces the tuple in place, shifting neighbors to fit the new size.
    /// Returns the old tuple, or `None` when the slot is unusable or the
    /// page lacks space for the growth.
    pub fn update_tuple(&mut self, slot: SlotId, new_tuple: &Tuple) -> Option<Tuple> {
        if slot >= self.tuple_count() || new_tuple.is_empty() {
            return None;
        }
        let entry = self.slot(slot);
        if entry.size == 0 || entry.size & DELETE_FLAG != 0 {
            return None;
        }
        let old_size = entry.size as usize;
        let new_size = new_tuple.len();
        if new_size > old_size && self.free_space() < new_size - old_size {
            return None;
        }
        let old_tuple = Tuple::from(self.bytes(entry.offset as usize, old_size));

        // The tuple's upper edge stays put; everything below shifts by the
        // size difference.
        let shift = old_size as i64 - new_size as i64;
        let mut header = self.table_header();
        let fsp = header.free_space_pointer as usize;
        let old_offset = entry.offset as usize;
        let new_fsp = (fsp as i64 + shift) as usize;
        self.data.copy_within(fsp..old_offset, new_fsp);
        header.free_space_pointer = new_fsp as u32;
        self.set_table_header(header);

        for i in 0..self.tuple_count() {
            let mut other = self.slot(i);
            if other.size != 0 && i != slot && (other.offset as usize) < old_offset {
                other.offset = (other.offset as i64 + shift) as u32;
                self.set_slot(i, other);
            }
        }

        let new_offset = (old_offset as i64 + shift) as usize;
        self.bytes_mut(new_offset, new_size)
            .copy_from_slice(new_tuple.data());
        self.set_slot(
            slot,
            TupleSlot {
                offset: new_offset as u32,
                size: new_size as u32,
            },
        );
        Some(old_tuple)
    }

    /// Reads a tuple whether or not it carries the delete mark; the commit
    /// and rollback paths need the image of marked tuples.
    pub fn get_tuple_raw(&self, slot: SlotId) -> Option<Tuple> {
        if slot >= self.tuple_count() {
            return None;
        }
        let entry = self.slot(slot);
        if entry.size == 0 {
            return None;
        }
        let size = (entry.size & !DELETE_FLAG) as usize;
        Some(Tuple::from(self.bytes(entry.offset as usize, size)))
    }

    /// Reads a live (non-deleted) tuple.
    pub fn get_tuple(&self, slot: SlotId) -> Option<Tuple> {
        if slot >= self.tuple_count() {
            return None;
        }
        let entry = self.slot(slot);
        if entry.size == 0 || entry.size & DELETE_FLAG != 0 {
            return None;
        }
        Some(Tuple::from(
            self.bytes(entry.offset as usize, entry.size as usize),
        ))
    }

    pub fn first_tuple_slot(&self) -> Option<SlotId> {
        self.next_tuple_slot_from(0)
    }

    pub fn next_tuple_slot(&self, prev: SlotId) -> Option<SlotId> {
        self.next_tuple_slot_from(prev + 1)
    }

    fn next_tuple_slot_from(&self, start: SlotId) -> Option<SlotId> {
        for i in start..self.tuple_count() {
            let entry = self.slot(i);
            if entry.size != 0 && entry.size & DELETE_FLAG == 0 {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Page {
        let mut page = Page::new(5);
        page.init_table_page(5, INVALID_PAGE_ID);
        page
    }

    #[test]
    fn insert_and_get() {
        let mut page = fresh_page();
        let a = page.insert_tuple(&Tuple::from(&b"first"[..])).unwrap();
        let b = page.insert_tuple(&Tuple::from(&b"second"[..])).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(page.get_tuple(a).unwrap().data(), b"first");
        assert_eq!(page.get_tuple(b).unwrap().data(), b"second");
        assert_eq!(page.tuple_count(), 2);
    }

    #[test]
    fn mark_rollback_apply_delete() {
        let mut page = fresh_page();
        let a = page.insert_tuple(&Tuple::from(&b"aaa"[..])).unwrap();
        let b = page.insert_tuple(&Tuple::from(&b"bbb"[..])).unwrap();

        assert!(page.mark_delete(a));
        assert!(page.get_tuple(a).is_none());
        assert!(page.rollback_delete(a));
        assert_eq!(page.get_tuple(a).unwrap().data(), b"aaa");

        assert!(page.mark_delete(a));
        assert!(page.apply_delete(a));
        assert!(page.get_tuple(a).is_none());
        // The surviving tuple is intact after compaction.
        assert_eq!(page.get_tuple(b).unwrap().data(), b"bbb");

        // The freed slot is reused.
        let c = page.insert_tuple(&Tuple::from(&b"ccc"[..])).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn update_grows_and_shrinks() {
        let mut page = fresh_page();
        let a = page.insert_tuple(&Tuple::from(&b"xxxx"[..])).unwrap();
        let b = page.insert_tuple(&Tuple::from(&b"yyyy"[..])).unwrap();

        let old = page.update_tuple(a, &Tuple::from(&b"long-replacement"[..])).unwrap();
        assert_eq!(old.data(), b"xxxx");
        assert_eq!(page.get_tuple(a).unwrap().data(), b"long-replacement");
        assert_eq!(page.get_tuple(b).unwrap().data(), b"yyyy");

        let old = page.update_tuple(a, &Tuple::from(&b"s"[..])).unwrap();
        assert_eq!(old.data(), b"long-replacement");
        assert_eq!(page.get_tuple(a).unwrap().data(), b"s");
        assert_eq!(page.get_tuple(b).unwrap().data(), b"yyyy");
    }

    #[test]
    fn page_full_rejects_insert() {
        let mut page = fresh_page();
        let big = Tuple::new(vec![1u8; 2000]);
        assert!(page.insert_tuple(&big).is_some());
        assert!(page.insert_tuple(&big).is_some());
        assert!(page.insert_tuple(&big).is_none());
    }

    #[test]
    fn insert_at_specific_slot() {
        let mut page = fresh_page();
        assert!(page.insert_tuple_at(2, &Tuple::from(&b"third"[..])));
        assert_eq!(page.tuple_count(), 3);
        assert_eq!(page.get_tuple(2).unwrap().data(), b"third");
        assert!(page.get_tuple(0).is_none());

        // Replaying over an occupied slot fails.
        assert!(!page.insert_tuple_at(2, &Tuple::from(&b"dup"[..])));
    }

    #[test]
    fn slot_iteration_skips_deleted() {
        let mut page = fresh_page();
        page.insert_tuple(&Tuple::from(&b"a"[..])).unwrap();
        let b = page.insert_tuple(&Tuple::from(&b"b"[..])).unwrap();
        page.insert_tuple(&Tuple::from(&b"c"[..])).unwrap();
        page.mark_delete(b);

        let mut seen = Vec::new();
        let mut cursor = page.first_tuple_slot();
        while let Some(slot) = cursor {
            seen.push(slot);
            cursor = page.next_tuple_slot(slot);
        }
        assert_eq!(seen, vec![0, 2]);
    }
}
