//! Record physical-state tags and on-disk wire format.

pub mod repr;
pub mod state;

pub use repr::{OffsetWidth, ParsedRecord, RecordBuilder, ReprWord};
pub use state::{Forward, RecordState};
