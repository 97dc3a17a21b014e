//! # Configuration Constants
//!
//! This module centralizes the compile-time configuration of the index,
//! grouping interdependent values together so that changing one makes the
//! knock-on effects visible. Constants that derive from each other are
//! co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (16 bytes, fixed)
//!       │
//!       ├─> PAGE_DATA_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!       │
//!       └─> PAYLOAD_BLOCK_COUNT (derived: PAGE_DATA_SIZE / PAGE_ALIGN)
//!             Must fit in the 15-bit payload pointer of a slot, so
//!             PAGE_SIZE may grow up to 256 KB before the slot layout
//!             needs revisiting.
//!
//! PAGE_ALIGN (8 bytes)
//!       │
//!       └─> payload heap granularity; every payload allocation is rounded
//!           up to a multiple of PAGE_ALIGN.
//!
//! Pmnk (u16)
//!       │
//!       └─> slots hold a 2-byte poor man's normalized key. Keys whose
//!           byte-comparable prefix fits in 2 bytes are compared without
//!           touching the payload heap at all.
//! ```

/// Size of one node page in bytes.
pub const PAGE_SIZE: usize = 8192;

/// Size of the page header in bytes. See `page::slotted` for the layout.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Bytes available to the slot vector and payload heap.
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Alignment (and granularity) of payload heap allocations.
pub const PAGE_ALIGN: usize = 8;

/// Number of payload blocks in the heap.
pub const PAYLOAD_BLOCK_COUNT: usize = PAGE_DATA_SIZE / PAGE_ALIGN;

/// The poor man's normalized key: the first bytes of a key in big-endian
/// order, zero-extended. Comparing two PMNKs as integers is consistent with
/// comparing the keys they were taken from: a strict PMNK inequality implies
/// the same key inequality, while equality is inconclusive and demands a
/// full key comparison.
pub type Pmnk = u16;

/// Width of the PMNK in bytes.
pub const PMNK_SIZE: usize = size_of::<Pmnk>();

const _: () = assert!(PAGE_SIZE % PAGE_ALIGN == 0);
const _: () = assert!(PAGE_HEADER_SIZE % PAGE_ALIGN == 0);
const _: () = assert!(PAYLOAD_BLOCK_COUNT <= 0x7FFF, "payload pointer is 15 bits");
