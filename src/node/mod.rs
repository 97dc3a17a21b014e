//! Node layer: key/value operations over a slotted page, the foster
//! protocol that splits and grows nodes in place, and the manager that
//! allocates and owns them.
//!
//! A node is just a [`SlottedPage`](crate::page::SlottedPage) with a level
//! byte: level 0 stores user values, higher levels store separator keys
//! whose values are child [`PageId`](mgr::PageId)s. Both roles run through
//! the same generic operations in [`ops`].

pub mod foster;
pub mod mgr;
pub mod ops;

pub use foster::FosterField;
pub use mgr::{NodeManager, NodePage, PageId};
pub use ops::{FindOutcome, InsertOutcome, RecordIter};
