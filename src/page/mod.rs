//! Slotted-page storage and page buffering/latching: the two
//! foundational modules every higher layer depends on.

pub mod buffer;
pub mod slotted;

pub use buffer::{Frame, FixWait, PageBuffer, PageHandle, PageType};
pub use slotted::SlottedPage;
