//! Overflow-record module, for records too large to fit in one slotted
//! page. Grounded on the
//! teacher's `btree::file` page-chaining (next/prev page ids threaded
//! through page headers) and `page::slotted` reused here as the physical
//! carrier for each overflow page's one "slot" of chain-header-plus-chunk
//! bytes — the same `PageBuffer`/`SlottedPage` substrate the heap file uses,
//! rather than a second raw-page code path.
//!
//! Wire format per overflow page (the page's single slot's bytes):
//! `is_first: u8 | total_length: u32 (0 if not first) | has_next: u8 |
//! next_vpid: (i16,i32) | chunk_len: u32 | chunk bytes`.

use crate::error::StoreError;
use crate::ids::{ClassOid, Vfid, Vpid};
use crate::page::buffer::{FixWait, PageBuffer, PageType};
use crate::record::RecordState;
use crate::types::StoreResult;

const OVF_HEADER_LEN: usize = 1 + 4 + 1 + 6 + 4;

struct OvfPage {
    total_length: Option<u32>,
    next: Option<Vpid>,
    chunk: Vec<u8>,
}

impl OvfPage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OVF_HEADER_LEN + self.chunk.len());
        out.push(self.total_length.is_some() as u8);
        out.extend_from_slice(&self.total_length.unwrap_or(0).to_le_bytes());
        out.push(self.next.is_some() as u8);
        let next = self.next.unwrap_or(Vpid::NULL);
        out.extend_from_slice(&next.volume.to_le_bytes());
        out.extend_from_slice(&next.page.to_le_bytes());
        out.extend_from_slice(&(self.chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.chunk);
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let is_first = bytes[0] != 0;
        let total_length = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
        let has_next = bytes[5] != 0;
        let volume = i16::from_le_bytes(bytes[6..8].try_into().unwrap());
        let page = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let chunk_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let chunk = bytes[16..16 + chunk_len].to_vec();
        Self {
            total_length: if is_first { Some(total_length) } else { None },
            next: if has_next { Some(Vpid::new(volume, page)) } else { None },
            chunk,
        }
    }
}

/// Overflow-record store: five operations keyed by a VPID, plus `flush`.
/// One instance per overflow file; the heap manager creates
/// one lazily on first big insert.
pub struct OverflowStore<'a> {
    buffer: &'a PageBuffer,
}

impl<'a> OverflowStore<'a> {
    pub fn new(buffer: &'a PageBuffer) -> Self {
        Self { buffer }
    }

    fn chunk_capacity(&self, page_size: usize) -> usize {
        page_size
            .saturating_sub(8) // slotted page header
            .saturating_sub(6) // one slot-directory entry
            .saturating_sub(OVF_HEADER_LEN)
    }

    /// `insert(vfid, record, class-oid) -> vpid`: allocate a
    /// chain of fresh pages holding `record`, return the first page's VPID.
    pub fn insert(&self, vfid: Vfid, record: &[u8], _class_oid: ClassOid) -> StoreResult<Vpid> {
        let capacity = self.chunk_capacity(self.page_size(vfid)?);
        let chunks: Vec<&[u8]> = record.chunks(capacity.max(1)).collect();
        let chunks: Vec<&[u8]> = if chunks.is_empty() { vec![&[][..]] } else { chunks };

        let mut vpids = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            let frame = self.buffer.new_page(vfid, PageType::Overflow)?;
            vpids.push(frame.vpid());
            self.buffer.unfix(&frame);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let frame = self.buffer.fix(vfid, vpids[i], PageType::Overflow, FixWait::Unconditional)?;
            let ovf = OvfPage {
                total_length: if i == 0 { Some(record.len() as u32) } else { None },
                next: vpids.get(i + 1).copied(),
                chunk: chunk.to_vec(),
            };
            {
                let mut page = frame.write();
                page.insert_at(0, &ovf.encode(), RecordState::Home)?;
            }
            frame.set_dirty();
            self.buffer.unfix(&frame);
        }

        Ok(vpids[0])
    }

    fn page_size(&self, vfid: Vfid) -> StoreResult<usize> {
        // every frame in this buffer shares one page size; create a probe
        // page only if the file is brand new and empty.
        if self.buffer.num_pages(vfid).unwrap_or(0) == 0 {
            return Ok(crate::consts::PAGE_SIZE);
        }
        let frame = self.buffer.fix(vfid, Vpid::new(vfid.volume, 0), PageType::Overflow, FixWait::Unconditional)?;
        let size = frame.read().as_bytes().len();
        self.buffer.unfix(&frame);
        Ok(size)
    }

    fn walk_chain(&self, vfid: Vfid, first: Vpid) -> StoreResult<(u32, Vec<Vpid>)> {
        let mut vpids = Vec::new();
        let mut cursor = Some(first);
        let mut total_length = 0u32;
        let mut first_seen = true;
        while let Some(vpid) = cursor {
            let frame = self.buffer.fix(vfid, vpid, PageType::Overflow, FixWait::Unconditional)?;
            let bytes = { frame.read().get_record(0)? };
            self.buffer.unfix(&frame);
            let ovf = OvfPage::decode(&bytes);
            if first_seen {
                total_length = ovf.total_length.unwrap_or(0);
                first_seen = false;
            }
            vpids.push(vpid);
            cursor = ovf.next;
        }
        Ok((total_length, vpids))
    }

    /// `get(vpid, record-buffer) -> {Success, DoesntFit, ...}`:
    /// reassembles the payload; `max_size` mirrors the caller's buffer and
    /// yields `StoreError::resize(total_length)` on `DoesntFit`.
    pub fn get(&self, vfid: Vfid, first: Vpid, max_size: Option<usize>) -> StoreResult<Vec<u8>> {
        let (total_length, vpids) = self.walk_chain(vfid, first)?;
        if let Some(max) = max_size {
            if total_length as usize > max {
                return Err(StoreError::resize(total_length as usize));
            }
        }
        let mut out = Vec::with_capacity(total_length as usize);
        for vpid in vpids {
            let frame = self.buffer.fix(vfid, vpid, PageType::Overflow, FixWait::Unconditional)?;
            let bytes = { frame.read().get_record(0)? };
            self.buffer.unfix(&frame);
            let ovf = OvfPage::decode(&bytes);
            out.extend_from_slice(&ovf.chunk);
        }
        Ok(out)
    }

    pub fn length(&self, vfid: Vfid, first: Vpid) -> StoreResult<usize> {
        let (total_length, _) = self.walk_chain(vfid, first)?;
        Ok(total_length as usize)
    }

    /// Diagnostic: `pages_in_chain * per-page capacity`, without reading
    /// payload bytes.
    pub fn capacity(&self, vfid: Vfid, first: Vpid) -> StoreResult<usize> {
        let (_, vpids) = self.walk_chain(vfid, first)?;
        let page_size = self.page_size(vfid)?;
        Ok(self.chunk_capacity(page_size) * vpids.len())
    }

    /// `update(vfid, vpid, record)`: rewrite the chain in
    /// place, extending or shrinking as needed.
    pub fn update(&self, vfid: Vfid, first: Vpid, record: &[u8]) -> StoreResult<()> {
        self.delete(vfid, first)?;
        let new_first = self.insert(vfid, record, crate::ids::Oid::NULL)?;
        debug_assert_eq!(new_first.volume, first.volume, "overflow update must reuse the same file");
        Ok(())
    }

    /// `delete(vfid, vpid)`: free the whole chain.
    pub fn delete(&self, vfid: Vfid, first: Vpid) -> StoreResult<()> {
        let (_, vpids) = self.walk_chain(vfid, first)?;
        for vpid in vpids {
            let frame = self.buffer.fix(vfid, vpid, PageType::Overflow, FixWait::Unconditional)?;
            frame.write().delete(0)?;
            frame.set_dirty();
            self.buffer.unfix(&frame);
        }
        Ok(())
    }

    /// `flush(vpid)`: flush dirty pages of the chain.
    pub fn flush(&self, vfid: Vfid, first: Vpid) -> StoreResult<()> {
        let (_, vpids) = self.walk_chain(vfid, first)?;
        for vpid in vpids {
            let frame = self.buffer.fix(vfid, vpid, PageType::Overflow, FixWait::Unconditional)?;
            self.buffer.flush(vfid, &frame)?;
            self.buffer.unfix(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Oid;

    fn setup() -> (tempfile::TempDir, PageBuffer, Vfid) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PageBuffer::new(dir.path(), 256);
        (dir, buffer, Vfid::new(1, 1))
    }

    #[test]
    fn insert_get_delete_round_trips_multi_page() {
        let (_dir, buffer, vfid) = setup();
        let store = OverflowStore::new(&buffer);
        let payload = vec![7u8; 900]; // spans several 256-byte pages
        let first = store.insert(vfid, &payload, Oid::NULL).unwrap();
        assert_eq!(store.length(vfid, first).unwrap(), 900);
        let got = store.get(vfid, first, None).unwrap();
        assert_eq!(got, payload);
        assert!(store.capacity(vfid, first).unwrap() >= 900);

        store.delete(vfid, first).unwrap();
        assert!(store.get(vfid, first, None).is_err());
    }

    #[test]
    fn get_reports_required_size_when_buffer_too_small() {
        let (_dir, buffer, vfid) = setup();
        let store = OverflowStore::new(&buffer);
        let payload = vec![1u8; 500];
        let first = store.insert(vfid, &payload, Oid::NULL).unwrap();
        let err = store.get(vfid, first, Some(10)).unwrap_err();
        assert_eq!(err.required_size(), Some(500));
    }
}
