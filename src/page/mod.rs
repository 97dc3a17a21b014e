//! Page-level primitives: the slotted byte container and PMNK search.
//!
//! Everything in this module is key- and value-agnostic; it deals in PMNKs,
//! slots, and payload blocks. The `encoding` and `node` layers give the
//! bytes their meaning.

pub mod search;
pub mod slotted;

pub use search::binary_search;
pub use slotted::{payload_blocks, Slot, SlottedPage, SLOT_SIZE};
