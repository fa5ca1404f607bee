use super::error::{RecordError, RecordResult};
use super::SlotId;
use crate::file::PAGE_SIZE;

/// First bytes of every slotted page: `slot_count`, `free_slots` and
/// `record_size` as little-endian u16, then two reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub slot_count: u16,
    pub free_slots: u16,
    pub record_size: u16,
}

impl PageHeader {
    const SIZE: usize = 8;

    fn empty_page(slot_count: u16, record_size: u16) -> Self {
        Self {
            slot_count,
            free_slots: slot_count,
            record_size,
        }
    }

    fn read(buffer: &[u8]) -> RecordResult<Self> {
        let Some(raw) = buffer.get(..Self::SIZE) else {
            return Err(RecordError::Deserialization(format!(
                "page header needs {} bytes, got {}",
                Self::SIZE,
                buffer.len()
            )));
        };
        let field = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        Ok(Self {
            slot_count: field(0),
            free_slots: field(2),
            record_size: field(4),
        })
    }

    fn write(&self, buffer: &mut [u8]) {
        let fields = [self.slot_count, self.free_slots, self.record_size, 0];
        for (chunk, value) in buffer[..Self::SIZE].chunks_exact_mut(2).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Fixed-size-record slotted layout over a page buffer, zero-copy.
///
/// Layout: `[header][occupancy bitmap][slot 0][slot 1]...`. An all-zero
/// buffer reads as a page with no slots.
pub struct SlotPage<'a> {
    buffer: &'a mut [u8],
    header: PageHeader,
}

impl<'a> SlotPage<'a> {
    /// Calculate maximum number of slots for a given record size
    pub fn calculate_slot_count(record_size: usize) -> usize {
        if record_size == 0 || record_size > PAGE_SIZE {
            return 0;
        }

        let available = PAGE_SIZE - PageHeader::SIZE;

        // bitmap_size + slot_count * record_size <= available, bitmap_size = ⌈slot_count / 8⌉
        let max_slots = (available * 8) / (1 + record_size * 8);
        max_slots.min(u16::MAX as usize)
    }

    /// Lay out an empty page in the provided buffer
    pub fn format(buffer: &'a mut [u8], record_size: usize) -> RecordResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(RecordError::Deserialization(format!(
                "Buffer must be PAGE_SIZE ({}) bytes, got {}",
                PAGE_SIZE,
                buffer.len()
            )));
        }

        let slot_count = Self::calculate_slot_count(record_size);
        if slot_count == 0 {
            return Err(RecordError::InvalidRecord(format!(
                "Record size {} does not fit in a page",
                record_size
            )));
        }

        let header = PageHeader::empty_page(slot_count as u16, record_size as u16);
        buffer.fill(0);
        header.write(buffer);

        Ok(Self { buffer, header })
    }

    /// Wrap an existing page buffer
    pub fn from_buffer(buffer: &'a mut [u8]) -> RecordResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(RecordError::Deserialization(format!(
                "Invalid page size: {} bytes",
                buffer.len()
            )));
        }

        let header = PageHeader::read(buffer)?;

        let slot_count = header.slot_count as usize;
        let data_end =
            PageHeader::SIZE + slot_count.div_ceil(8) + slot_count * header.record_size as usize;
        if data_end > PAGE_SIZE || header.free_slots > header.slot_count {
            return Err(RecordError::Deserialization(
                "Page layout exceeds page size".to_string(),
            ));
        }

        Ok(Self { buffer, header })
    }

    fn bitmap_range(&self) -> std::ops::Range<usize> {
        let bitmap_size = (self.header.slot_count as usize).div_ceil(8);
        PageHeader::SIZE..PageHeader::SIZE + bitmap_size
    }

    fn slot_range(&self, slot_id: SlotId) -> std::ops::Range<usize> {
        let record_size = self.header.record_size as usize;
        let start = self.bitmap_range().end + slot_id * record_size;
        start..start + record_size
    }

    fn write_header(&mut self) {
        self.header.write(self.buffer);
    }

    fn check_slot(&self, slot_id: SlotId) -> RecordResult<()> {
        if slot_id >= self.header.slot_count as usize {
            return Err(RecordError::InvalidSlot(slot_id));
        }
        Ok(())
    }

    /// Find a free slot, returns None if page is full
    pub fn find_free_slot(&self) -> Option<SlotId> {
        if self.header.free_slots == 0 {
            return None;
        }

        (0..self.header.slot_count as usize).find(|&slot_id| !self.is_slot_used(slot_id))
    }

    /// Check if a slot is used
    pub fn is_slot_used(&self, slot_id: SlotId) -> bool {
        if slot_id >= self.header.slot_count as usize {
            return false;
        }
        let bitmap = &self.buffer[self.bitmap_range()];
        (bitmap[slot_id / 8] & (1 << (slot_id % 8))) != 0
    }

    /// Store a record in the first free slot. Returns None if the page is full.
    pub fn insert(&mut self, data: &[u8]) -> RecordResult<Option<SlotId>> {
        let Some(slot_id) = self.find_free_slot() else {
            return Ok(None);
        };
        self.set_record(slot_id, data)?;
        self.mark_slot_used(slot_id)?;
        Ok(Some(slot_id))
    }

    /// Mark a slot as used
    pub fn mark_slot_used(&mut self, slot_id: SlotId) -> RecordResult<()> {
        self.check_slot(slot_id)?;

        if !self.is_slot_used(slot_id) {
            let byte_idx = self.bitmap_range().start + slot_id / 8;
            self.buffer[byte_idx] |= 1 << (slot_id % 8);
            self.header.free_slots = self.header.free_slots.saturating_sub(1);
            self.write_header();
        }

        Ok(())
    }

    /// Free a used slot. Freeing an empty slot is an error.
    pub fn mark_slot_free(&mut self, slot_id: SlotId) -> RecordResult<()> {
        self.check_slot(slot_id)?;
        if !self.is_slot_used(slot_id) {
            return Err(RecordError::SlotEmpty(slot_id));
        }

        let byte_idx = self.bitmap_range().start + slot_id / 8;
        self.buffer[byte_idx] &= !(1 << (slot_id % 8));
        self.header.free_slots = (self.header.free_slots + 1).min(self.header.slot_count);
        self.write_header();

        Ok(())
    }

    /// Get record data from a used slot
    pub fn get_record(&self, slot_id: SlotId) -> RecordResult<&[u8]> {
        self.check_slot(slot_id)?;
        if !self.is_slot_used(slot_id) {
            return Err(RecordError::SlotEmpty(slot_id));
        }
        Ok(&self.buffer[self.slot_range(slot_id)])
    }

    /// Set record data in a slot
    pub fn set_record(&mut self, slot_id: SlotId, data: &[u8]) -> RecordResult<()> {
        self.check_slot(slot_id)?;

        let record_size = self.header.record_size as usize;
        if data.len() != record_size {
            return Err(RecordError::SizeMismatch {
                table_record_size: record_size,
                actual: data.len(),
            });
        }

        let range = self.slot_range(slot_id);
        self.buffer[range].copy_from_slice(data);
        Ok(())
    }

    /// Used slots in ascending order
    pub fn used_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.header.slot_count as usize).filter(|&slot_id| self.is_slot_used(slot_id))
    }

    pub fn header(&self) -> PageHeader {
        self.header
    }

    pub fn slot_count(&self) -> usize {
        self.header.slot_count as usize
    }

    pub fn free_slot_count(&self) -> usize {
        self.header.free_slots as usize
    }

    pub fn record_size(&self) -> usize {
        self.header.record_size as usize
    }

    pub fn is_full(&self) -> bool {
        self.header.free_slots == 0
    }

    pub fn is_empty(&self) -> bool {
        self.header.free_slots == self.header.slot_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_slot_count() {
        let slot_count = SlotPage::calculate_slot_count(23);
        assert!(slot_count > 150 && slot_count < 200);

        let slot_count = SlotPage::calculate_slot_count(1000);
        assert_eq!(slot_count, 4);

        assert_eq!(SlotPage::calculate_slot_count(0), 0);
        assert_eq!(SlotPage::calculate_slot_count(PAGE_SIZE + 1), 0);
    }

    #[test]
    fn test_format() {
        let mut buffer = vec![0xAAu8; PAGE_SIZE];
        let page = SlotPage::format(&mut buffer, 23).unwrap();
        assert_eq!(page.slot_count(), SlotPage::calculate_slot_count(23));
        assert_eq!(page.free_slot_count(), page.slot_count());
        assert_eq!(page.record_size(), 23);
        assert!(page.is_empty());
        assert!(!page.is_full());
    }

    #[test]
    fn test_header_layout() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = SlotPage::format(&mut buffer, 1000).unwrap();
        page.insert(&[1; 1000]).unwrap();
        let header = page.header();
        drop(page);

        assert_eq!(&buffer[..8], &[4, 0, 3, 0, 0xE8, 0x03, 0, 0]);
        assert_eq!(PageHeader::read(&buffer).unwrap(), header);
        assert!(matches!(
            PageHeader::read(&buffer[..4]),
            Err(RecordError::Deserialization(_))
        ));
    }

    #[test]
    fn test_format_rejects_oversized_records() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let result = SlotPage::format(&mut buffer, PAGE_SIZE);
        assert!(matches!(result, Err(RecordError::InvalidRecord(_))));
    }

    #[test]
    fn test_zeroed_buffer_has_no_slots() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let page = SlotPage::from_buffer(&mut buffer).unwrap();
        assert_eq!(page.slot_count(), 0);
        assert_eq!(page.find_free_slot(), None);
        assert_eq!(page.used_slots().count(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = SlotPage::format(&mut buffer, 4).unwrap();

        assert_eq!(page.insert(&[1, 2, 3, 4]).unwrap(), Some(0));
        assert_eq!(page.insert(&[5, 6, 7, 8]).unwrap(), Some(1));
        assert_eq!(page.get_record(1).unwrap(), &[5, 6, 7, 8]);
        assert_eq!(page.free_slot_count(), page.slot_count() - 2);

        let result = page.insert(&[1, 2]);
        assert!(matches!(result, Err(RecordError::SizeMismatch { .. })));
    }

    #[test]
    fn test_free_slot_is_reused() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = SlotPage::format(&mut buffer, 4).unwrap();

        page.insert(&[1; 4]).unwrap();
        page.insert(&[2; 4]).unwrap();
        page.mark_slot_free(0).unwrap();

        assert!(matches!(page.get_record(0), Err(RecordError::SlotEmpty(0))));
        assert!(matches!(page.mark_slot_free(0), Err(RecordError::SlotEmpty(0))));
        assert_eq!(page.insert(&[3; 4]).unwrap(), Some(0));
        assert_eq!(page.used_slots().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_reopen_from_buffer() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = SlotPage::format(&mut buffer, 23).unwrap();
        page.insert(&[7; 23]).unwrap();
        page.mark_slot_used(5).unwrap();
        let free_before = page.free_slot_count();
        drop(page);

        let restored = SlotPage::from_buffer(&mut buffer).unwrap();
        assert_eq!(restored.free_slot_count(), free_before);
        assert!(restored.is_slot_used(0));
        assert!(restored.is_slot_used(5));
        assert!(!restored.is_slot_used(1));
        assert_eq!(restored.get_record(0).unwrap(), &[7; 23]);
    }

    #[test]
    fn test_page_full() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = SlotPage::format(&mut buffer, 1000).unwrap();

        for _ in 0..page.slot_count() {
            assert!(page.insert(&[0; 1000]).unwrap().is_some());
        }
        assert!(page.is_full());
        assert_eq!(page.insert(&[0; 1000]).unwrap(), None);
        assert!(matches!(page.mark_slot_used(4), Err(RecordError::InvalidSlot(4))));
    }
}
