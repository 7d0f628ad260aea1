//! Physical record states.
//!
//! Every slot carries exactly one of these tags. The invariants enforced
//! elsewhere (heap manager) are:
//! - a `Newhome` has exactly one live `Relocation` pointing at it and the
//!   same class-oid;
//! - a `Bigone`'s overflow chain length exceeds `max_slotted_record_length`;
//! - `AssignAddress` is replaced in place by `Home` on first full write;
//! - `Home` may grow into `Relocation`/`Bigone` on update and may shrink
//!   back into `Home` if it refits.

use crate::ids::Oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Entire record content is stored in place.
    Home,
    /// Slot holds only a forwarding OID to a `Newhome` slot elsewhere.
    Relocation,
    /// Content of a relocated record; reachable only via its `Relocation`.
    Newhome,
    /// Slot holds a forwarding VPID into the overflow file.
    Bigone,
    /// OID reserved, no content written yet.
    AssignAddress,
    /// Tombstone: deleted, slot not yet eligible for reuse.
    MarkDeleted,
    /// Tombstone: deleted and eligible for reuse.
    DeletedWillReuse,
}

impl RecordState {
    /// `next`/scan skips these: they are not logical records.
    pub fn is_logical_record(&self) -> bool {
        !matches!(
            self,
            RecordState::Newhome
                | RecordState::AssignAddress
                | RecordState::MarkDeleted
                | RecordState::DeletedWillReuse
        )
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, RecordState::MarkDeleted | RecordState::DeletedWillReuse)
    }

    pub fn to_tag(self) -> u8 {
        match self {
            RecordState::Home => 0,
            RecordState::Relocation => 1,
            RecordState::Newhome => 2,
            RecordState::Bigone => 3,
            RecordState::AssignAddress => 4,
            RecordState::MarkDeleted => 5,
            RecordState::DeletedWillReuse => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => RecordState::Home,
            1 => RecordState::Relocation,
            2 => RecordState::Newhome,
            3 => RecordState::Bigone,
            4 => RecordState::AssignAddress,
            5 => RecordState::MarkDeleted,
            6 => RecordState::DeletedWillReuse,
            _ => panic!("corrupt slot: unknown record state tag {}", tag),
        }
    }
}

/// Payload carried by a `Relocation` or `Bigone` slot: a forwarding address
/// rather than content. `Relocation` forwards to another OID (the
/// `Newhome`); `Bigone` forwards to an overflow VPID, serialized as exactly
/// 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    Newhome(Oid),
    Overflow(crate::ids::Vpid),
}
