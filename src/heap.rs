//! Heap file manager. The largest component: create/
//! destroy, insert/update/delete/get/next over the four-state physical
//! record layout. Page-chain allocation and header page conventions
//! mirror a B+tree file's, and the insert/update/delete entry points
//! fan out to page-level mutation plus logging the same way a table
//! handle's do, narrowed from a sorted-key chain to this subsystem's
//! simpler doubly-linked heap chain.

use std::collections::HashSet;

use crate::attr_info::validate_shard_group;
use crate::best_space::{self, BestSpaceCache, HeapPageSource};
use crate::error::StoreError;
use crate::ids::{ClassOid, Hfid, Oid, ShardGroupId, SlotId, Vfid, Vpid, GLOBAL_GROUPID};
use crate::overflow::OverflowStore;
use crate::page::buffer::{FixWait, PageBuffer, PageHandle, PageType};
use crate::record::RecordState;
use crate::tx_log::LogManager;
use crate::txn::{SystemOpOutcome, Transaction};
use crate::types::StoreResult;

pub const HEAP_HEADER_AND_CHAIN_SLOTID: SlotId = crate::consts::HEAP_HEADER_AND_CHAIN_SLOTID;

/// Head-page statistics. `last_vpid` is this crate's own use of the
/// original layout's two reserved words: an O(1) tail pointer for page-chain
/// append, documented in DESIGN.md rather than left as dead reserved bytes.
#[derive(Debug, Clone, Copy)]
struct HeapHeader {
    class_oid: ClassOid,
    overflow_vfid: Option<Vfid>,
    next_vpid: Option<Vpid>,
    last_vpid: Option<Vpid>,
    full_search_vpid: Option<Vpid>,
}

fn encode_opt_vpid(out: &mut Vec<u8>, v: Option<Vpid>) {
    out.push(v.is_some() as u8);
    out.extend_from_slice(&v.unwrap_or(Vpid::NULL).encode());
}

fn decode_opt_vpid(bytes: &[u8], cursor: &mut usize) -> Option<Vpid> {
    let present = bytes[*cursor] != 0;
    *cursor += 1;
    let vpid = Vpid::decode(&bytes[*cursor..*cursor + Vpid::ENCODED_LEN]);
    *cursor += Vpid::ENCODED_LEN;
    if present {
        Some(vpid)
    } else {
        None
    }
}

impl HeapHeader {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.class_oid.encode());
        out.push(self.overflow_vfid.is_some() as u8);
        let vfid = self.overflow_vfid.unwrap_or(Vfid::new(-1, -1));
        out.extend_from_slice(&vfid.volume.to_le_bytes());
        out.extend_from_slice(&vfid.file_seq.to_le_bytes());
        encode_opt_vpid(&mut out, self.next_vpid);
        encode_opt_vpid(&mut out, self.last_vpid);
        encode_opt_vpid(&mut out, self.full_search_vpid);
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut cursor = 0usize;
        let class_oid = Oid::decode(&bytes[cursor..cursor + Oid::ENCODED_LEN]);
        cursor += Oid::ENCODED_LEN;
        let has_vfid = bytes[cursor] != 0;
        cursor += 1;
        let volume = i16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]);
        let file_seq = i32::from_le_bytes(bytes[cursor + 2..cursor + 6].try_into().unwrap());
        cursor += 6;
        let overflow_vfid = if has_vfid { Some(Vfid::new(volume, file_seq)) } else { None };
        let next_vpid = decode_opt_vpid(bytes, &mut cursor);
        let last_vpid = decode_opt_vpid(bytes, &mut cursor);
        let full_search_vpid = decode_opt_vpid(bytes, &mut cursor);
        Self { class_oid, overflow_vfid, next_vpid, last_vpid, full_search_vpid }
    }
}

/// Non-header page slot-0 content.
#[derive(Debug, Clone, Copy)]
struct ChainRecord {
    class_oid: ClassOid,
    prev: Option<Vpid>,
    next: Option<Vpid>,
}

impl ChainRecord {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.class_oid.encode());
        encode_opt_vpid(&mut out, self.prev);
        encode_opt_vpid(&mut out, self.next);
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut cursor = 0usize;
        let class_oid = Oid::decode(&bytes[cursor..cursor + Oid::ENCODED_LEN]);
        cursor += Oid::ENCODED_LEN;
        let prev = decode_opt_vpid(bytes, &mut cursor);
        let next = decode_opt_vpid(bytes, &mut cursor);
        Self { class_oid, prev, next }
    }
}

/// A handle onto one heap file: its id plus the collaborators it needs
/// (page buffer, best-space cache, log manager). Construct one per
/// operation call site, the same way a table handle is built from a
/// stored root-pointer page.
pub struct HeapFile<'a> {
    pub hfid: Hfid,
    pub buffer: &'a PageBuffer,
    pub best_space: &'a BestSpaceCache,
    pub log: &'a LogManager,
    pub page_size: usize,
}

impl<'a> HeapFile<'a> {
    pub fn max_slotted_record_length(&self) -> usize {
        self.page_size - 8 - 6 - 6 // header, one slot dir entry, slack for slot 0's chain record growth
    }

    fn header_vpid(&self) -> Vpid {
        self.hfid.header_vpid()
    }

    fn read_header(&self) -> StoreResult<HeapHeader> {
        let frame = self.buffer.fix(self.hfid.file, self.header_vpid(), PageType::HeapHeader, FixWait::Unconditional)?;
        let bytes = frame.read().get_record(HEAP_HEADER_AND_CHAIN_SLOTID)?;
        self.buffer.unfix(&frame);
        Ok(HeapHeader::decode(&bytes))
    }

    fn write_header(&self, header: &HeapHeader) -> StoreResult<()> {
        let frame = self.buffer.fix(self.hfid.file, self.header_vpid(), PageType::HeapHeader, FixWait::Unconditional)?;
        frame.write().update(HEAP_HEADER_AND_CHAIN_SLOTID, &header.encode())?;
        frame.set_dirty();
        self.buffer.unfix(&frame);
        Ok(())
    }

    fn overflow(&self) -> OverflowStore<'_> {
        OverflowStore::new(self.buffer)
    }

    /// `create(hfid, exp-pages, class-oid)`. `vfid` is the
    /// file id the caller has already allocated; the header page becomes
    /// page 0 of it, so `Hfid::new(vfid, 0)` names the resulting heap.
    pub fn create(buffer: &'a PageBuffer, log: &'a LogManager, tx: &mut Transaction, vfid: Vfid, class_oid: ClassOid) -> StoreResult<Hfid> {
        log.start_system_op(tx);
        let frame = buffer.new_page(vfid, PageType::HeapHeader)?;
        let header = HeapHeader { class_oid, overflow_vfid: None, next_vpid: None, last_vpid: None, full_search_vpid: None };
        {
            let mut page = frame.write();
            page.insert_at(HEAP_HEADER_AND_CHAIN_SLOTID, &header.encode(), RecordState::Home)?;
        }
        frame.set_dirty();
        buffer.unfix(&frame);
        log.end_system_op(tx, SystemOpOutcome::Commit);
        log.append_undo_only(tx.id(), format!("create heap file {}", vfid));
        Ok(Hfid::new(vfid, 0))
    }

    /// `destroy(hfid)`: destroys the overflow file (if any)
    /// and the heap file, then drops best-space entries for it.
    pub fn destroy(hfid: Hfid, buffer: &PageBuffer, best_space: &BestSpaceCache, log: &LogManager) -> StoreResult<()> {
        let throwaway = HeapFile { hfid, buffer, best_space, log, page_size: crate::consts::PAGE_SIZE };
        if let Ok(header) = throwaway.read_header() {
            if let Some(ovf_vfid) = header.overflow_vfid {
                buffer.destroy_file(ovf_vfid)?;
            }
        }
        buffer.destroy_file(hfid.file)?;
        best_space.del_all_by_hfid(hfid);
        Ok(())
    }

    fn ensure_overflow_file(&self, class_oid: ClassOid) -> StoreResult<Vfid> {
        let mut header = self.read_header()?;
        if let Some(v) = header.overflow_vfid {
            return Ok(v);
        }
        // lazily created and stamped into the header atomically; the
        // derived file-seq keeps this crate from needing a separate
        // file-id allocator service, which is out of scope.
        let vfid = Vfid::new(self.hfid.file.volume, self.hfid.file.file_seq.wrapping_add(1_000_000));
        header.overflow_vfid = Some(vfid);
        self.write_header(&header)?;
        log::debug!("lazily created overflow file {} for class {}", vfid, class_oid);
        Ok(vfid)
    }

    fn allocate_new_page(&self, class_oid: ClassOid) -> StoreResult<Vpid> {
        let mut header = self.read_header()?;
        let frame = self.buffer.new_page(self.hfid.file, PageType::Heap)?;
        let vpid = frame.vpid();
        let chain = ChainRecord { class_oid, prev: header.last_vpid, next: None };
        {
            let mut page = frame.write();
            page.insert_at(HEAP_HEADER_AND_CHAIN_SLOTID, &chain.encode(), RecordState::Home)?;
        }
        frame.set_dirty();
        let free_now = frame.read().get_free_space();
        self.buffer.unfix(&frame);

        if let Some(prev_vpid) = header.last_vpid {
            let prev_frame = self.buffer.fix(self.hfid.file, prev_vpid, PageType::Heap, FixWait::Unconditional)?;
            {
                let mut page = prev_frame.write();
                let mut prev_chain = ChainRecord::decode(&page.get_record(HEAP_HEADER_AND_CHAIN_SLOTID)?);
                prev_chain.next = Some(vpid);
                page.update(HEAP_HEADER_AND_CHAIN_SLOTID, &prev_chain.encode())?;
            }
            prev_frame.set_dirty();
            self.buffer.unfix(&prev_frame);
        } else {
            header.next_vpid = Some(vpid);
        }
        header.last_vpid = Some(vpid);
        self.write_header(&header)?;

        if free_now > best_space::drop_threshold(self.page_size) {
            self.best_space.add(self.hfid, vpid, free_now).ok();
        }
        Ok(vpid)
    }

    /// Best-space-driven placement, falling back to a fresh page when no
    /// cached candidate fits.
    fn pick_or_alloc_page(&self, class_oid: ClassOid, need: usize) -> StoreResult<Vpid> {
        let found = self.best_space.find_page_for_insert(self.hfid, need, |vpid| {
            let frame = self.buffer.fix(self.hfid.file, vpid, PageType::Heap, FixWait::Unconditional)?;
            let probed = match frame.try_read() {
                Some(page) => {
                    let free = page.get_free_space();
                    let chain_bytes = page.peek_record(HEAP_HEADER_AND_CHAIN_SLOTID).map(|b| b.to_vec());
                    Some((free, chain_bytes))
                }
                None => None,
            };
            self.buffer.unfix(&frame);
            let result = match probed {
                Some((free, Ok(chain_bytes))) => {
                    let chain = ChainRecord::decode(&chain_bytes);
                    Some((free, chain.class_oid == class_oid))
                }
                Some((_, Err(e))) => return Err(e),
                None => None,
            };
            Ok(result)
        })?;

        match found {
            Some(vpid) => Ok(vpid),
            None => self.allocate_new_page(class_oid),
        }
    }

    fn insert_raw(&self, vpid: Vpid, bytes: &[u8], state: RecordState, group: ShardGroupId) -> StoreResult<Oid> {
        let frame = self.buffer.fix(self.hfid.file, vpid, PageType::Heap, FixWait::Unconditional)?;
        let slot = {
            let mut page = frame.write();
            page.insert(bytes, state)?
        };
        frame.set_dirty();
        let free = frame.read().get_free_space();
        self.best_space.update(self.hfid, vpid, free, self.page_size).ok();
        self.buffer.unfix(&frame);
        Ok(Oid::new(vpid, slot, group))
    }

    fn overwrite_slot(&self, oid: Oid, bytes: &[u8], state: RecordState) -> StoreResult<()> {
        let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
        {
            let mut page = frame.write();
            page.insert_at(oid.slot, bytes, state)?;
        }
        frame.set_dirty();
        let free = frame.read().get_free_space();
        self.best_space.update(self.hfid, oid.vpid, free, self.page_size).ok();
        self.buffer.unfix(&frame);
        Ok(())
    }

    fn delete_slot(&self, oid: Oid) -> StoreResult<()> {
        let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
        frame.write().delete(oid.slot)?;
        frame.set_dirty();
        let free = frame.read().get_free_space();
        self.best_space.update(self.hfid, oid.vpid, free, self.page_size).ok();
        self.buffer.unfix(&frame);
        Ok(())
    }

    /// `insert`: oversize payloads route through overflow
    /// and become `BIGONE`; everything else is written `HOME`. `group` may
    /// arrive negative (a migration sender's record) and is
    /// resolved to its owned positive value before the OID is built.
    pub fn insert(&self, tx: &mut Transaction, payload: &[u8], class_oid: ClassOid, group: ShardGroupId, is_shard_table: bool) -> StoreResult<Oid> {
        let group = validate_shard_group(is_shard_table, group, |g| tx.owns_group(g))?;
        let max_home = self.max_slotted_record_length();

        let (state, stored) = if payload.len() > max_home {
            let ovf_vfid = self.ensure_overflow_file(class_oid)?;
            let first = self.overflow().insert(ovf_vfid, payload, class_oid)?;
            (RecordState::Bigone, first.encode().to_vec())
        } else {
            (RecordState::Home, payload.to_vec())
        };

        let vpid = self.pick_or_alloc_page(class_oid, stored.len())?;
        let oid = self.insert_raw(vpid, &stored, state, group)?;
        self.log.append_undoredo_recdes(tx.id(), oid, None, Some(stored));
        Ok(oid)
    }

    /// Reserve an OID with no content yet (`ASSIGN_ADDRESS`: the physical
    /// length is preassigned before the row's bytes are known). The caller
    /// (the force engine, on a `FLUSH_INSERT` whose record says
    /// `ASSIGN_ADDRESS`) is
    /// expected to take an exclusive lock on the returned OID; `update`
    /// replaces this slot in place with `HOME` on the first full write.
    pub fn insert_reserved(&self, tx: &mut Transaction, class_oid: ClassOid, group: ShardGroupId, is_shard_table: bool) -> StoreResult<Oid> {
        let group = validate_shard_group(is_shard_table, group, |g| tx.owns_group(g))?;
        let vpid = self.pick_or_alloc_page(class_oid, 0)?;
        let oid = self.insert_raw(vpid, &[], RecordState::AssignAddress, group)?;
        self.log.append_undoredo_recdes(tx.id(), oid, None, None);
        Ok(oid)
    }

    /// `get(oid)`: follows the physical-state machine to the
    /// logical record, returning `Resize` if `max_size` is too small.
    pub fn get(&self, oid: Oid, max_size: Option<usize>) -> StoreResult<Vec<u8>> {
        let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
        let state = frame.read().get_record_type(oid.slot)?;
        let forward_bytes = if matches!(state, RecordState::Relocation | RecordState::Bigone) {
            Some(frame.read().get_record(oid.slot)?)
        } else {
            None
        };
        let home_bytes = if state == RecordState::Home { Some(frame.read().get_record(oid.slot)?) } else { None };
        self.buffer.unfix(&frame);

        match state {
            RecordState::Home => {
                let bytes = home_bytes.unwrap();
                if let Some(max) = max_size {
                    if bytes.len() > max {
                        return Err(StoreError::resize(bytes.len()));
                    }
                }
                Ok(bytes)
            }
            RecordState::Relocation => {
                let newhome_oid = Oid::decode(&forward_bytes.unwrap());
                self.get(newhome_oid, max_size)
            }
            RecordState::Bigone => {
                let vpid = Vpid::decode(&forward_bytes.unwrap());
                let header = self.read_header()?;
                let ovf_vfid = header.overflow_vfid.ok_or_else(|| StoreError::invalid("record is BIGONE but heap has no overflow file"))?;
                self.overflow().get(ovf_vfid, vpid, max_size)
            }
            other => Err(StoreError::not_found(format!("{} is a {:?}, not a logical record", oid, other))),
        }
    }

    /// `update`: three cases by physical state. The logical
    /// OID never changes; a `HOME` may relocate or go `BIGONE`; a
    /// `RELOCATION`'s new-home may move again or shrink back to `HOME`; a
    /// `BIGONE` may shrink back to `HOME`/`RELOCATION`.
    pub fn update(&self, tx: &mut Transaction, oid: Oid, new_payload: &[u8], class_oid: ClassOid) -> StoreResult<Oid> {
        let max_home = self.max_slotted_record_length();
        let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
        let state = frame.read().get_record_type(oid.slot)?;
        let old_bytes = frame.read().get_record(oid.slot)?;
        self.buffer.unfix(&frame);

        match state {
            RecordState::Home => {
                if new_payload.len() <= max_home {
                    let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
                    let fits = frame.write().update(oid.slot, new_payload);
                    match fits {
                        Ok(()) => {
                            frame.set_dirty();
                            let free = frame.read().get_free_space();
                            self.best_space.update(self.hfid, oid.vpid, free, self.page_size).ok();
                            self.buffer.unfix(&frame);
                            self.log.append_undoredo_recdes(tx.id(), oid, Some(old_bytes), Some(new_payload.to_vec()));
                            return Ok(oid);
                        }
                        Err(_) => self.buffer.unfix(&frame),
                    }
                }

                if new_payload.len() > max_home {
                    let ovf_vfid = self.ensure_overflow_file(class_oid)?;
                    let first = self.overflow().insert(ovf_vfid, new_payload, class_oid)?;
                    self.overwrite_slot(oid, &first.encode(), RecordState::Bigone)?;
                } else {
                    let new_vpid = self.pick_or_alloc_page(class_oid, new_payload.len())?;
                    let newhome_oid = self.insert_raw(new_vpid, new_payload, RecordState::Newhome, oid.group)?;
                    self.overwrite_slot(oid, &newhome_oid.encode(), RecordState::Relocation)?;
                }
                self.log.append_undoredo_recdes(tx.id(), oid, Some(old_bytes), Some(new_payload.to_vec()));
                Ok(oid)
            }
            RecordState::Relocation => {
                let newhome_oid = Oid::decode(&old_bytes);
                if new_payload.len() <= max_home {
                    let newhome_frame = self.buffer.fix(self.hfid.file, newhome_oid.vpid, PageType::Heap, FixWait::Unconditional)?;
                    let fits = newhome_frame.write().update(newhome_oid.slot, new_payload);
                    if fits.is_ok() {
                        newhome_frame.set_dirty();
                        let free = newhome_frame.read().get_free_space();
                        self.best_space.update(self.hfid, newhome_oid.vpid, free, self.page_size).ok();
                        self.buffer.unfix(&newhome_frame);
                        self.log.append_undoredo_recdes(tx.id(), oid, Some(old_bytes), Some(new_payload.to_vec()));
                        return Ok(oid);
                    }
                    self.buffer.unfix(&newhome_frame);
                }

                // doesn't fit at the current new-home: delete it and pick
                // the larger of home-page / a third page / overflow.
                self.delete_slot(newhome_oid)?;
                if new_payload.len() > max_home {
                    let ovf_vfid = self.ensure_overflow_file(class_oid)?;
                    let first = self.overflow().insert(ovf_vfid, new_payload, class_oid)?;
                    self.overwrite_slot(oid, &first.encode(), RecordState::Bigone)?;
                } else {
                    let home_frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
                    let fits_home = home_frame.write().insert_at(oid.slot, new_payload, RecordState::Home);
                    if fits_home.is_ok() {
                        home_frame.set_dirty();
                        let free = home_frame.read().get_free_space();
                        self.best_space.update(self.hfid, oid.vpid, free, self.page_size).ok();
                        self.buffer.unfix(&home_frame);
                    } else {
                        self.buffer.unfix(&home_frame);
                        let new_vpid = self.pick_or_alloc_page(class_oid, new_payload.len())?;
                        let fresh_newhome = self.insert_raw(new_vpid, new_payload, RecordState::Newhome, oid.group)?;
                        self.overwrite_slot(oid, &fresh_newhome.encode(), RecordState::Relocation)?;
                    }
                }
                self.log.append_undoredo_recdes(tx.id(), oid, Some(old_bytes), Some(new_payload.to_vec()));
                Ok(oid)
            }
            RecordState::Bigone => {
                let vpid = Vpid::decode(&old_bytes);
                let header = self.read_header()?;
                let ovf_vfid = header.overflow_vfid.ok_or_else(|| StoreError::invalid("record is BIGONE but heap has no overflow file"))?;

                if new_payload.len() <= max_home {
                    self.overflow().delete(ovf_vfid, vpid)?;
                    let home_frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
                    let fits_home = home_frame.write().insert_at(oid.slot, new_payload, RecordState::Home);
                    if fits_home.is_ok() {
                        home_frame.set_dirty();
                        let free = home_frame.read().get_free_space();
                        self.best_space.update(self.hfid, oid.vpid, free, self.page_size).ok();
                        self.buffer.unfix(&home_frame);
                    } else {
                        self.buffer.unfix(&home_frame);
                        let new_vpid = self.pick_or_alloc_page(class_oid, new_payload.len())?;
                        let newhome_oid = self.insert_raw(new_vpid, new_payload, RecordState::Newhome, oid.group)?;
                        self.overwrite_slot(oid, &newhome_oid.encode(), RecordState::Relocation)?;
                    }
                } else {
                    self.overflow().update(ovf_vfid, vpid, new_payload)?;
                }
                self.log.append_undoredo_recdes(tx.id(), oid, Some(old_bytes), Some(new_payload.to_vec()));
                Ok(oid)
            }
            RecordState::AssignAddress => {
                // first full write of a reserved OID: always stamp HOME in
                // place (no prior content to relocate away from), falling
                // through to overflow/relocation only if it doesn't fit.
                if new_payload.len() <= max_home {
                    let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
                    let fits = frame.write().insert_at(oid.slot, new_payload, RecordState::Home);
                    if fits.is_ok() {
                        frame.set_dirty();
                        let free = frame.read().get_free_space();
                        self.best_space.update(self.hfid, oid.vpid, free, self.page_size).ok();
                        self.buffer.unfix(&frame);
                        self.log.append_undoredo_recdes(tx.id(), oid, None, Some(new_payload.to_vec()));
                        return Ok(oid);
                    }
                    self.buffer.unfix(&frame);
                }

                if new_payload.len() > max_home {
                    let ovf_vfid = self.ensure_overflow_file(class_oid)?;
                    let first = self.overflow().insert(ovf_vfid, new_payload, class_oid)?;
                    self.overwrite_slot(oid, &first.encode(), RecordState::Bigone)?;
                } else {
                    let new_vpid = self.pick_or_alloc_page(class_oid, new_payload.len())?;
                    let newhome_oid = self.insert_raw(new_vpid, new_payload, RecordState::Newhome, oid.group)?;
                    self.overwrite_slot(oid, &newhome_oid.encode(), RecordState::Relocation)?;
                }
                self.log.append_undoredo_recdes(tx.id(), oid, None, Some(new_payload.to_vec()));
                Ok(oid)
            }
            other => Err(StoreError::invalid(format!("cannot update a {:?} slot", other))),
        }
    }

    /// `delete`: resolve the physical state, cascade to the
    /// new-home/overflow chain, and update best-space.
    pub fn delete(&self, tx: &mut Transaction, oid: Oid) -> StoreResult<()> {
        let frame = self.buffer.fix(self.hfid.file, oid.vpid, PageType::Heap, FixWait::Unconditional)?;
        let state = frame.read().get_record_type(oid.slot)?;
        let old_bytes = frame.read().get_record(oid.slot)?;
        self.buffer.unfix(&frame);

        match state {
            RecordState::Home => self.delete_slot(oid)?,
            RecordState::Relocation => {
                let newhome_oid = Oid::decode(&old_bytes);
                self.delete_slot(newhome_oid)?;
                self.delete_slot(oid)?;
            }
            RecordState::Bigone => {
                let vpid = Vpid::decode(&old_bytes);
                let header = self.read_header()?;
                if let Some(ovf_vfid) = header.overflow_vfid {
                    self.overflow().delete(ovf_vfid, vpid)?;
                }
                self.delete_slot(oid)?;
            }
            other => return Err(StoreError::invalid(format!("cannot delete a {:?} slot", other))),
        }

        self.log.append_undoredo_recdes(tx.id(), oid, Some(old_bytes), None);
        Ok(())
    }

    /// `next(hfid, cursor)` rendered as an iterator. `owned_groups = None`
    /// disables the shard-group filter.
    pub fn scan(&self, owned_groups: Option<HashSet<ShardGroupId>>) -> HeapScan<'_, 'a> {
        HeapScan {
            heap: self,
            cursor_vpid: None,
            cursor_slot: None,
            owned_groups,
            started: false,
        }
    }
}

impl<'a> HeapPageSource for HeapFile<'a> {
    fn next_chain_page(&self, hfid: Hfid, cursor: Option<Vpid>) -> StoreResult<Option<Vpid>> {
        debug_assert_eq!(hfid, self.hfid);
        match cursor {
            None => Ok(self.read_header()?.next_vpid),
            Some(vpid) => {
                let frame = self.buffer.fix(self.hfid.file, vpid, PageType::Heap, FixWait::Unconditional)?;
                let chain = ChainRecord::decode(frame.read().peek_record(HEAP_HEADER_AND_CHAIN_SLOTID)?);
                self.buffer.unfix(&frame);
                Ok(chain.next)
            }
        }
    }

    fn free_space(&self, _hfid: Hfid, vpid: Vpid) -> StoreResult<usize> {
        let frame = self.buffer.fix(self.hfid.file, vpid, PageType::Heap, FixWait::Unconditional)?;
        let free = frame.read().get_free_space();
        self.buffer.unfix(&frame);
        Ok(free)
    }

    fn page_class_oid(&self, _hfid: Hfid, vpid: Vpid) -> StoreResult<ClassOid> {
        let frame = self.buffer.fix(self.hfid.file, vpid, PageType::Heap, FixWait::Unconditional)?;
        let chain = ChainRecord::decode(frame.read().peek_record(HEAP_HEADER_AND_CHAIN_SLOTID)?);
        self.buffer.unfix(&frame);
        Ok(chain.class_oid)
    }

    fn persist_full_search_cursor(&self, _hfid: Hfid, vpid: Option<Vpid>) -> StoreResult<()> {
        let mut header = self.read_header()?;
        header.full_search_vpid = vpid;
        self.write_header(&header)
    }

    fn num_pages(&self, _hfid: Hfid) -> StoreResult<usize> {
        self.buffer.num_pages(self.hfid.file)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Heap scan cursor. Skips `NEWHOME`/`ASSIGN_ADDRESS`/
/// tombstones (not logical records) and, when `owned_groups` is set,
/// records whose shard group the caller's transaction doesn't own.
pub struct HeapScan<'h, 'a> {
    heap: &'h HeapFile<'a>,
    cursor_vpid: Option<Vpid>,
    cursor_slot: Option<SlotId>,
    owned_groups: Option<HashSet<ShardGroupId>>,
    started: bool,
}

impl<'h, 'a> Iterator for HeapScan<'h, 'a> {
    type Item = StoreResult<(Oid, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor_vpid.is_none() {
                if self.started {
                    return None;
                }
                self.started = true;
                match self.heap.read_header() {
                    Ok(header) => match header.next_vpid {
                        Some(v) => {
                            self.cursor_vpid = Some(v);
                            self.cursor_slot = Some(HEAP_HEADER_AND_CHAIN_SLOTID);
                        }
                        None => return None,
                    },
                    Err(e) => return Some(Err(e)),
                }
            }

            let vpid = self.cursor_vpid.unwrap();
            let frame: PageHandle = match self.heap.buffer.fix(self.heap.hfid.file, vpid, PageType::Heap, FixWait::Unconditional) {
                Ok(f) => f,
                Err(e) => return Some(Err(e)),
            };
            let next_slot = frame.read().next_record(self.cursor_slot);
            let state = next_slot.map(|s| frame.read().get_record_type(s));

            match (next_slot, state) {
                (Some(slot), Some(Ok(rec_state))) => {
                    self.cursor_slot = Some(slot);
                    self.heap.buffer.unfix(&frame);
                    if !rec_state.is_logical_record() {
                        continue;
                    }
                    let probe_oid = Oid::new(vpid, slot, GLOBAL_GROUPID);
                    match self.heap.get(probe_oid, None) {
                        Ok(bytes) => {
                            let group = if bytes.len() >= 8 {
                                crate::record::repr::peek_group(&bytes)
                            } else {
                                GLOBAL_GROUPID
                            };
                            if let Some(owned) = &self.owned_groups {
                                if !owned.contains(&group) {
                                    continue;
                                }
                            }
                            return Some(Ok((Oid::new(vpid, slot, group), bytes)));
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                (Some(_), Some(Err(e))) => {
                    self.heap.buffer.unfix(&frame);
                    return Some(Err(e));
                }
                (None, _) => {
                    let chain = match ChainRecord::decode(match frame.read().peek_record(HEAP_HEADER_AND_CHAIN_SLOTID) {
                        Ok(b) => b,
                        Err(e) => {
                            self.heap.buffer.unfix(&frame);
                            return Some(Err(e));
                        }
                    }) {
                        c => c,
                    };
                    self.heap.buffer.unfix(&frame);
                    self.cursor_vpid = chain.next;
                    self.cursor_slot = Some(HEAP_HEADER_AND_CHAIN_SLOTID);
                    if self.cursor_vpid.is_none() {
                        return None;
                    }
                }
                (Some(_), None) => unreachable!(),
            }
        }
    }
}
