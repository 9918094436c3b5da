//! Heap page layout.
//!
//! A heap page is a header bitmap followed by fixed-width tuple slots:
//!
//! ```text
//! +----------------------+--------+--------+-----+----------+---------+
//! | header (1 bit/slot)  | slot 0 | slot 1 | ... | slot N-1 | padding |
//! +----------------------+--------+--------+-----+----------+---------+
//! ```
//!
//! The slot count is the largest `N` such that `N` tuples plus `N` header bits
//! fit in the page. Bit `i` of the header lives in byte `i / 8`, least
//! significant bit first, and is set when slot `i` holds a tuple.

use std::{fmt::Display, sync::Arc};

use crate::{DbError, DbResult, RecordId, TransactionId, Tuple, TupleDesc};

/// Identifier of a table, derived from the path of its backing file.
pub type TableId = u64;

/// The address of one page: which table it belongs to and where in the file it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: usize,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: usize) -> Self {
        Self { table_id, page_no }
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}:{}", self.table_id, self.page_no)
    }
}

#[derive(Debug)]
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots a page of `page_size` bytes holds for tuples of `desc`.
    pub fn slots_per_page(page_size: usize, desc: &TupleDesc) -> usize {
        (page_size * 8) / (desc.size() * 8 + 1)
    }

    fn header_len(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// An all-zero page image, which parses as a page with every slot free.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// Parse a page from exactly `page_size` bytes.
    pub fn new(id: PageId, data: &[u8], desc: Arc<TupleDesc>, page_size: usize) -> DbResult<Self> {
        if data.len() != page_size {
            return Err(DbError::schema(format!(
                "page {id} has {} bytes, expected {page_size}",
                data.len()
            )));
        }
        let num_slots = Self::slots_per_page(page_size, &desc);
        let header_len = Self::header_len(num_slots);
        let tuple_size = desc.size();
        let header = data[..header_len].to_vec();

        let mut slots = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                slots.push(None);
                continue;
            }
            let start = header_len + slot * tuple_size;
            let mut tuple = Tuple::parse(Arc::clone(&desc), &data[start..start + tuple_size])?;
            tuple.set_record_id(Some(RecordId::new(id, slot)));
            slots.push(Some(tuple));
        }

        Ok(Self {
            id,
            desc,
            page_size,
            header,
            slots,
            dirtied_by: None,
            before_image: data.to_vec(),
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Serialize the page into exactly `page_size` bytes.
    pub fn page_data(&self) -> Vec<u8> {
        let tuple_size = self.desc.size();
        let mut data = Vec::with_capacity(self.page_size);
        data.extend_from_slice(&self.header);
        for slot in &self.slots {
            match slot {
                Some(tuple) => data.extend_from_slice(&tuple.serialize()),
                None => data.resize(data.len() + tuple_size, 0),
            }
        }
        data.resize(self.page_size, 0);
        data
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    pub fn mark_dirty(&mut self, dirty: bool, txn: TransactionId) {
        self.dirtied_by = dirty.then_some(txn);
    }

    /// The last committed contents of this page.
    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Snapshot the current contents as the before-image for the next writer.
    pub fn set_before_image(&mut self) {
        self.before_image = self.page_data();
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.is_some())
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    /// Place `tuple` in the first free slot and return its new location.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> DbResult<RecordId> {
        if **tuple.tuple_desc() != *self.desc {
            return Err(DbError::schema(format!(
                "tuple schema ({}) does not match page schema ({})",
                tuple.tuple_desc(),
                self.desc
            )));
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(DbError::PageFull(self.id))?;
        let record_id = RecordId::new(self.id, slot);
        tuple.set_record_id(Some(record_id));
        self.slots[slot] = Some(tuple);
        self.set_slot_used(slot, true);
        Ok(record_id)
    }

    /// Free the slot holding `tuple`.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let record_id = tuple
            .record_id()
            .ok_or_else(|| DbError::schema("tuple has no record id"))?;
        if record_id.page_id != self.id || !self.is_slot_used(record_id.slot) {
            return Err(DbError::TupleNotFound(record_id));
        }
        self.slots[record_id.slot] = None;
        self.set_slot_used(record_id.slot, false);
        Ok(())
    }

    /// The tuples stored on this page, in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod heap_page_tests {
    use super::*;
    use crate::{Field, Type};

    const PAGE_SIZE: usize = 4096;

    fn schema() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::from_types(&[Type::Int, Type::Int]).unwrap())
    }

    fn tuple(desc: &Arc<TupleDesc>, a: i32, b: i32) -> Tuple {
        Tuple::new(Arc::clone(desc), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    fn empty_page(desc: &Arc<TupleDesc>) -> HeapPage {
        HeapPage::new(
            PageId::new(1, 0),
            &HeapPage::empty_page_data(PAGE_SIZE),
            Arc::clone(desc),
            PAGE_SIZE,
        )
        .unwrap()
    }

    #[test]
    fn test_slot_count() {
        // 8 byte tuples: 4096 * 8 / 65 = 504 slots, 63 header bytes
        let desc = schema();
        assert_eq!(HeapPage::slots_per_page(PAGE_SIZE, &desc), 504);
        let page = empty_page(&desc);
        assert_eq!(page.num_slots(), 504);
        assert_eq!(page.num_empty_slots(), 504);
        assert_eq!(page.page_data().len(), PAGE_SIZE);
    }

    #[test]
    fn test_insert_and_delete() {
        let desc = schema();
        let mut page = empty_page(&desc);

        let rid = page.insert_tuple(tuple(&desc, 1, 2)).unwrap();
        assert_eq!(rid, RecordId::new(page.id(), 0));
        assert!(page.is_slot_used(0));
        assert_eq!(page.num_empty_slots(), 503);

        let stored = page.tuples().next().unwrap().clone();
        assert_eq!(stored.record_id(), Some(rid));
        page.delete_tuple(&stored).unwrap();
        assert!(!page.is_slot_used(0));
        assert_eq!(page.tuples().count(), 0);

        //  deleting twice fails
        assert!(matches!(
            page.delete_tuple(&stored),
            Err(DbError::TupleNotFound(_))
        ));
    }

    #[test]
    fn test_serialization_preserves_slots() {
        let desc = schema();
        let mut page = empty_page(&desc);
        for i in 0..10 {
            page.insert_tuple(tuple(&desc, i, i * 10)).unwrap();
        }
        let third = page.tuples().nth(3).unwrap().clone();
        page.delete_tuple(&third).unwrap();

        let data = page.page_data();
        let reparsed = HeapPage::new(page.id(), &data, Arc::clone(&desc), PAGE_SIZE).unwrap();
        assert_eq!(reparsed.page_data(), data);
        assert!(!reparsed.is_slot_used(3));
        let values: Vec<i32> = reparsed
            .tuples()
            .map(|t| match t.field(0).unwrap() {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_full_page_rejects_insert() {
        let desc = schema();
        let mut page = empty_page(&desc);
        for i in 0..page.num_slots() {
            page.insert_tuple(tuple(&desc, i as i32, 0)).unwrap();
        }
        assert_eq!(page.num_empty_slots(), 0);
        assert!(matches!(
            page.insert_tuple(tuple(&desc, 0, 0)),
            Err(DbError::PageFull(_))
        ));
    }

    #[test]
    fn test_dirty_tracking_and_before_image() {
        let desc = schema();
        let mut page = empty_page(&desc);
        let txn = TransactionId::new();
        let original = page.page_data();

        page.insert_tuple(tuple(&desc, 1, 1)).unwrap();
        page.mark_dirty(true, txn);
        assert_eq!(page.dirtied_by(), Some(txn));
        assert_eq!(page.before_image(), original.as_slice());

        page.set_before_image();
        page.mark_dirty(false, txn);
        assert!(!page.is_dirty());
        assert_eq!(page.before_image(), page.page_data().as_slice());
    }

    #[test]
    fn test_rejects_wrong_schema() {
        let desc = schema();
        let mut page = empty_page(&desc);
        let other = Arc::new(TupleDesc::from_types(&[Type::Str]).unwrap());
        let wrong = Tuple::new(other, vec![Field::from("x")]).unwrap();
        assert!(matches!(
            page.insert_tuple(wrong),
            Err(DbError::SchemaViolation(_))
        ));
    }
}
