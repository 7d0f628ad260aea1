//! On-disk user-record wire format. The bit/byte accessors on the
//! representation-id word and the bound-bit map are load-bearing: any
//! change to their shifts, masks, or field sizes breaks every record
//! already on disk.
//!
//! Layout of a `Home`/`Newhome` record's bytes:
//!
//! ```text
//! repr-id word (4 bytes) | shard-group-id (4 bytes)
//! | variable-offset table (n_variable + 1 entries, OFFSET_SIZE bytes each)
//! | fixed-attribute area (each attr padded to its fixed length)
//! | bound-bit bitmap (present iff BOUND_BIT_FLAG set)
//! | variable-attribute bytes
//! ```

use bit_vec::BitVec;

use crate::error::StoreError;
use crate::ids::ShardGroupId;
use crate::io::{read_exact, Decodeable, Encodeable};
use crate::types::StoreResult;

/// Low bit of the repr-id word: a fixed bound-bit bitmap follows the fixed
/// attribute area.
pub const BOUND_BIT_FLAG: u32 = 1 << 0;

/// Bits 1..3 of the repr-id word: width (in bytes) of each variable-offset
/// table entry, encoded 0..=3 -> {1, 2, 4, 8} bytes.
const OFFSET_SIZE_SHIFT: u32 = 1;
const OFFSET_SIZE_MASK: u32 = 0b11 << OFFSET_SIZE_SHIFT;

/// The representation id itself occupies the remaining high bits.
const REPR_ID_SHIFT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetWidth {
    One,
    Two,
    Four,
    Eight,
}

impl OffsetWidth {
    pub fn bytes(self) -> usize {
        match self {
            OffsetWidth::One => 1,
            OffsetWidth::Two => 2,
            OffsetWidth::Four => 4,
            OffsetWidth::Eight => 8,
        }
    }

    fn to_code(self) -> u32 {
        match self {
            OffsetWidth::One => 0,
            OffsetWidth::Two => 1,
            OffsetWidth::Four => 2,
            OffsetWidth::Eight => 3,
        }
    }

    fn from_code(code: u32) -> Self {
        match code {
            0 => OffsetWidth::One,
            1 => OffsetWidth::Two,
            2 => OffsetWidth::Four,
            _ => OffsetWidth::Eight,
        }
    }

    /// Smallest width that can represent `max_offset`.
    pub fn fitting(max_offset: usize) -> Self {
        if max_offset <= u8::MAX as usize {
            OffsetWidth::One
        } else if max_offset <= u16::MAX as usize {
            OffsetWidth::Two
        } else if max_offset <= u32::MAX as usize {
            OffsetWidth::Four
        } else {
            OffsetWidth::Eight
        }
    }

    fn write(self, buf: &mut Vec<u8>, value: usize) {
        match self {
            OffsetWidth::One => buf.push(value as u8),
            OffsetWidth::Two => buf.extend_from_slice(&(value as u16).to_le_bytes()),
            OffsetWidth::Four => buf.extend_from_slice(&(value as u32).to_le_bytes()),
            OffsetWidth::Eight => buf.extend_from_slice(&(value as u64).to_le_bytes()),
        }
    }

    fn read(self, bytes: &[u8]) -> usize {
        match self {
            OffsetWidth::One => bytes[0] as usize,
            OffsetWidth::Two => u16::from_le_bytes([bytes[0], bytes[1]]) as usize,
            OffsetWidth::Four => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            OffsetWidth::Eight => u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReprWord {
    pub repr_id: i32,
    pub has_bound_bits: bool,
    pub offset_width: OffsetWidth,
}

impl ReprWord {
    pub fn new(repr_id: i32, has_bound_bits: bool, offset_width: OffsetWidth) -> Self {
        Self {
            repr_id,
            has_bound_bits,
            offset_width,
        }
    }

    pub fn encode(self) -> u32 {
        let mut word = (self.repr_id as u32) << REPR_ID_SHIFT;
        word |= self.offset_width.to_code() << OFFSET_SIZE_SHIFT;
        if self.has_bound_bits {
            word |= BOUND_BIT_FLAG;
        }
        word
    }

    pub fn decode(word: u32) -> Self {
        Self {
            repr_id: (word >> REPR_ID_SHIFT) as i32,
            has_bound_bits: word & BOUND_BIT_FLAG != 0,
            offset_width: OffsetWidth::from_code((word & OFFSET_SIZE_MASK) >> OFFSET_SIZE_SHIFT),
        }
    }
}

/// A decoded record header plus byte offsets into the payload; produced by
/// [`parse`] and consumed by the attribute-info facility.
pub struct ParsedRecord<'a> {
    pub repr: ReprWord,
    pub group: ShardGroupId,
    pub variable_offsets: Vec<usize>,
    pub fixed_area: &'a [u8],
    pub bound_bits: Option<BitVec>,
    pub variable_area: &'a [u8],
}

/// Read just the shard-group-id word (bytes 4..8) without decoding the
/// rest of the record; used by heap scan to recover a logical OID's group
/// (this shard-group scan filter) without fully parsing content
/// whose representation may not be known yet.
pub fn peek_group(bytes: &[u8]) -> crate::ids::ShardGroupId {
    crate::ids::ShardGroupId::from_le_bytes(bytes[4..8].try_into().unwrap())
}

/// Parse the wire format described at the top of this module. `n_variable`,
/// `fixed_area_len`, and `n_fixed_attrs` are known ahead of time from the
/// class's current representation.
pub fn parse(
    bytes: &[u8],
    n_variable: usize,
    fixed_area_len: usize,
    n_fixed_attrs: usize,
) -> StoreResult<ParsedRecord<'_>> {
    if bytes.len() < 8 {
        return Err(StoreError::resize(8));
    }
    let word = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let repr = ReprWord::decode(word);
    let group = i32::from_le_bytes(bytes[4..8].try_into().unwrap());

    let mut cursor = 8usize;
    let offset_entry_bytes = repr.offset_width.bytes();
    let table_len = (n_variable + 1) * offset_entry_bytes;
    if bytes.len() < cursor + table_len {
        return Err(StoreError::resize(cursor + table_len));
    }
    let mut variable_offsets = Vec::with_capacity(n_variable + 1);
    for i in 0..(n_variable + 1) {
        let start = cursor + i * offset_entry_bytes;
        variable_offsets.push(repr.offset_width.read(&bytes[start..start + offset_entry_bytes]));
    }
    cursor += table_len;

    if bytes.len() < cursor + fixed_area_len {
        return Err(StoreError::resize(cursor + fixed_area_len));
    }
    let fixed_area = &bytes[cursor..cursor + fixed_area_len];
    cursor += fixed_area_len;

    let bound_bits = if repr.has_bound_bits {
        let byte_len = (n_fixed_attrs + 7) / 8;
        if bytes.len() < cursor + byte_len {
            return Err(StoreError::resize(cursor + byte_len));
        }
        let bv = BitVec::from_bytes(&bytes[cursor..cursor + byte_len]);
        cursor += byte_len;
        Some(bv)
    } else {
        None
    };

    // Variable area runs to the end of the record; its total length is the
    // last entry of the variable-offset table (: "the last entry
    // marking record end").
    let variable_total = *variable_offsets.last().unwrap_or(&0);
    if bytes.len() < cursor + variable_total {
        return Err(StoreError::resize(cursor + variable_total));
    }
    let variable_area = &bytes[cursor..cursor + variable_total];

    Ok(ParsedRecord {
        repr,
        group,
        variable_offsets,
        fixed_area,
        bound_bits,
        variable_area,
    })
}

/// Builder mirroring `transform_to_disk` : representation-id word
/// with flags, shard-group word, variable-offset table, fixed area (each
/// attribute padded to its fixed length), bound-bit bitmap, variable area.
pub struct RecordBuilder {
    repr_id: i32,
    group: ShardGroupId,
    fixed_area: Vec<u8>,
    bound_bits: BitVec,
    variable_chunks: Vec<Vec<u8>>,
}

impl RecordBuilder {
    pub fn new(repr_id: i32, group: ShardGroupId, n_fixed: usize) -> Self {
        Self {
            repr_id,
            group,
            fixed_area: Vec::new(),
            bound_bits: BitVec::from_elem(n_fixed, false),
            variable_chunks: Vec::new(),
        }
    }

    pub fn push_fixed(&mut self, bytes: &[u8], fixed_len: usize, attr_index: usize, is_bound: bool) {
        let mut padded = bytes.to_vec();
        padded.resize(fixed_len, 0);
        self.fixed_area.extend_from_slice(&padded);
        if attr_index >= self.bound_bits.len() {
            self.bound_bits.grow(attr_index + 1 - self.bound_bits.len(), false);
        }
        self.bound_bits.set(attr_index, is_bound);
    }

    pub fn push_variable(&mut self, bytes: Vec<u8>) {
        self.variable_chunks.push(bytes);
    }

    /// Encodes the record; fails with `StoreError::resize(expected_size)` if
    /// `max_size` (the caller's buffer) is too small, matching
    /// `transform_to_disk`'s contract of returning `-expected_size` as a
    /// hint.
    pub fn build(self, max_size: Option<usize>) -> StoreResult<Vec<u8>> {
        let n_variable = self.variable_chunks.len();
        let mut variable_offsets = Vec::with_capacity(n_variable + 1);
        let mut running = 0usize;
        for chunk in &self.variable_chunks {
            running += chunk.len();
            variable_offsets.push(running);
        }
        variable_offsets.push(running);
        let variable_total = running;

        let offset_width = OffsetWidth::fitting(variable_total.max(1));
        let has_bound_bits = self.bound_bits.len() > 0;

        let word = ReprWord::new(self.repr_id, has_bound_bits, offset_width).encode();

        let bound_bytes = if has_bound_bits {
            self.bound_bits.to_bytes()
        } else {
            Vec::new()
        };

        let table_len = (n_variable + 1) * offset_width.bytes();
        let expected_size =
            4 + 4 + table_len + self.fixed_area.len() + bound_bytes.len() + variable_total;

        if let Some(max) = max_size {
            if expected_size > max {
                return Err(StoreError::resize(expected_size));
            }
        }

        let mut out = Vec::with_capacity(expected_size);
        out.extend_from_slice(&word.to_le_bytes());
        out.extend_from_slice(&self.group.to_le_bytes());
        for off in &variable_offsets {
            let mut tmp = Vec::new();
            offset_width.write(&mut tmp, *off);
            out.extend_from_slice(&tmp);
        }
        out.extend_from_slice(&self.fixed_area);
        out.extend_from_slice(&bound_bytes);
        for chunk in self.variable_chunks {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl Encodeable for ReprWord {
    fn encode(&self) -> Vec<u8> {
        ReprWord::encode(*self).to_le_bytes().to_vec()
    }
}

impl Decodeable for ReprWord {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let bytes = read_exact(reader, 4);
        ReprWord::decode(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_word_round_trips() {
        let w = ReprWord::new(7, true, OffsetWidth::Two);
        let encoded = w.encode();
        assert_eq!(ReprWord::decode(encoded), w);
    }

    #[test]
    fn repr_word_round_trips_without_bound_bits() {
        let w = ReprWord::new(0, false, OffsetWidth::One);
        assert_eq!(ReprWord::decode(w.encode()), w);
    }

    #[test]
    fn builder_then_parse_round_trips_group_and_variable_area() {
        let mut b = RecordBuilder::new(3, 42, 2);
        b.push_fixed(&11i64.to_le_bytes(), 8, 0, true);
        b.push_fixed(&[], 8, 1, false);
        b.push_variable(b"hello".to_vec());
        b.push_variable(b"world!".to_vec());
        let bytes = b.build(None).unwrap();

        let parsed = parse(&bytes, 2, 16, 2).unwrap();
        assert_eq!(parsed.repr.repr_id, 3);
        assert_eq!(parsed.group, 42);
        assert_eq!(&parsed.variable_area[0..5], b"hello");
        assert_eq!(&parsed.variable_area[5..11], b"world!");
        let bb = parsed.bound_bits.unwrap();
        assert!(bb.get(0).unwrap());
        assert!(!bb.get(1).unwrap());
    }

    #[test]
    fn builder_reports_required_size_when_too_small() {
        let mut b = RecordBuilder::new(0, GLOBAL_TEST_GROUP, 0);
        b.push_variable(vec![0u8; 100]);
        let err = b.build(Some(4)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Resize);
        assert!(err.required_size().unwrap() > 100);
    }

    const GLOBAL_TEST_GROUP: ShardGroupId = 0;
}
