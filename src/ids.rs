//! Physical and logical identifiers.
//!
//! A `(volume, page)` pair is a VPID; `(volume, page, slot, group)` is an
//! OID. File ids carry a volume and a file sequence number; HFID/BTID name
//! a heap/index by its file id plus its first (header/root) page.

use std::fmt;

pub type VolumeId = i16;
pub type PageIndex = i32;
pub type SlotId = i16;

/// Shard-group tag carried on every record OID.
///
/// A negative value means "from a migration sender, accept and convert to
/// positive". Non-shard ("global") tables carry
/// `GLOBAL_GROUPID` exactly.
pub type ShardGroupId = i32;

pub const GLOBAL_GROUPID: ShardGroupId = 0;
pub const NULL_GROUPID: ShardGroupId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vpid {
    pub volume: VolumeId,
    pub page: PageIndex,
}

impl Vpid {
    pub const NULL: Vpid = Vpid {
        volume: -1,
        page: -1,
    };

    pub fn new(volume: VolumeId, page: PageIndex) -> Self {
        Self { volume, page }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Vpid {
    pub const ENCODED_LEN: usize = 6;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..2].copy_from_slice(&self.volume.to_le_bytes());
        out[2..6].copy_from_slice(&self.page.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self::new(
            i16::from_le_bytes([bytes[0], bytes[1]]),
            i32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        )
    }
}

impl fmt::Display for Vpid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{vol:{},pg:{}}}", self.volume, self.page)
    }
}

impl Default for Vpid {
    fn default() -> Self {
        Self::NULL
    }
}

/// File id: `(volume, file-seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vfid {
    pub volume: VolumeId,
    pub file_seq: i32,
}

impl Vfid {
    pub fn new(volume: VolumeId, file_seq: i32) -> Self {
        Self { volume, file_seq }
    }
}

impl fmt::Display for Vfid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{vol:{},seq:{}}}", self.volume, self.file_seq)
    }
}

/// `HFID = (file-id, header-page-id)` names a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hfid {
    pub file: Vfid,
    pub header_page: PageIndex,
}

impl Hfid {
    pub fn new(file: Vfid, header_page: PageIndex) -> Self {
        Self { file, header_page }
    }

    pub fn header_vpid(&self) -> Vpid {
        Vpid::new(self.file.volume, self.header_page)
    }
}

impl fmt::Display for Hfid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HFID{{{},hdr:{}}}", self.file, self.header_page)
    }
}

/// `BTID = (file-id, root-page-id)` names an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Btid {
    pub file: Vfid,
    pub root_page: PageIndex,
}

impl Btid {
    pub fn new(file: Vfid, root_page: PageIndex) -> Self {
        Self { file, root_page }
    }
}

impl fmt::Display for Btid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BTID{{{},root:{}}}", self.file, self.root_page)
    }
}

/// Logical record identity: `(volume, page, slot, shard-group)`. The group
/// rides along on the OID rather than being looked up separately, so a
/// caller holding an OID already knows which shard owns the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid {
    pub vpid: Vpid,
    pub slot: SlotId,
    pub group: ShardGroupId,
}

impl Oid {
    pub const NULL: Oid = Oid {
        vpid: Vpid::NULL,
        slot: -1,
        group: NULL_GROUPID,
    };

    pub fn new(vpid: Vpid, slot: SlotId, group: ShardGroupId) -> Self {
        Self { vpid, slot, group }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Oid {
    pub const ENCODED_LEN: usize = Vpid::ENCODED_LEN + 2 + 4;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..6].copy_from_slice(&self.vpid.encode());
        out[6..8].copy_from_slice(&self.slot.to_le_bytes());
        out[8..12].copy_from_slice(&self.group.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            vpid: Vpid::decode(&bytes[0..6]),
            slot: i16::from_le_bytes([bytes[6], bytes[7]]),
            group: i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OID{{{},slot:{},grp:{}}}", self.vpid, self.slot, self.group)
    }
}

impl Default for Oid {
    fn default() -> Self {
        Self::NULL
    }
}

/// A class identity is itself an instance OID in the root class heap.
pub type ClassOid = Oid;

/// Representation id of a decoded class schema.
pub type ReprId = i32;

/// Sentinel requesting the class's current representation.
pub const LATEST_REPR: ReprId = -1;

/// Log sequence address, opaque to this subsystem beyond ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Lsa(pub u64);

impl fmt::Display for Lsa {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "lsa:{}", self.0)
    }
}
