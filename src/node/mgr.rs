//! # Node Manager
//!
//! Allocation and ownership of node pages. The manager owns every page it
//! ever constructs for the life of the tree; the tree and page payloads
//! refer to nodes by [`PageId`], and branch-record or foster-pointer
//! ownership is a bookkeeping notion layered on top (a branch slot owns
//! its child, a foster pointer is a transient link until adoption moves
//! it into a branch slot). Pages are never freed: there is no
//! deletion-merge, so empty leaves simply stay in place.
//!
//! ## Addressing
//!
//! A `PageId` is the page's index in the manager's table, handed out by a
//! monotonically increasing counter. Ids are 4 bytes and little-endian on
//! the wire, so a branch record's value is exactly one payload word.
//!
//! ## Concurrency
//!
//! The table is behind a `parking_lot::RwLock`; construction takes the
//! write lock, lookup takes the read lock and clones the `Arc`. Page
//! *contents* are never protected by that lock: each [`NodePage`] couples
//! its page bytes with a [`Latch`], and all access goes through the latch
//! protocol.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::latch::Latch;
use crate::page::slotted::SlottedPage;

/// Identifies a node page within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// One node: a slotted page plus the latch that protects it.
pub struct NodePage {
    id: PageId,
    latch: Latch,
    page: UnsafeCell<Box<SlottedPage>>,
}

// The UnsafeCell is only ever dereferenced under the latch protocol.
unsafe impl Send for NodePage {}
unsafe impl Sync for NodePage {}

impl NodePage {
    fn new(id: PageId, level: u8) -> Self {
        Self {
            id,
            latch: Latch::new(),
            page: UnsafeCell::new(SlottedPage::new_boxed(level)),
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// Shared view of the page bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold this node's latch (shared or exclusive) for
    /// the lifetime of the returned reference.
    pub(crate) unsafe fn page(&self) -> &SlottedPage {
        debug_assert!(self.latch.has_reader() || self.latch.has_writer());
        unsafe { &**self.page.get() }
    }

    /// Exclusive view of the page bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold this node's write latch for the lifetime of
    /// the returned reference, or the node must not yet be reachable by
    /// any other thread.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn page_mut(&self) -> &mut SlottedPage {
        debug_assert!(self.latch.has_writer());
        unsafe { &mut **self.page.get() }
    }
}

impl fmt::Debug for NodePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePage").field("id", &self.id).finish()
    }
}

/// Allocates and owns node pages.
#[derive(Debug, Default)]
pub struct NodeManager {
    pages: RwLock<Vec<Arc<NodePage>>>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, empty node of the given level. The returned node
    /// is unlatched and not yet reachable from the tree.
    pub fn construct_node(&self, level: u8) -> Arc<NodePage> {
        let mut pages = self.pages.write();
        let id = PageId(pages.len() as u32);
        let node = Arc::new(NodePage::new(id, level));
        pages.push(Arc::clone(&node));
        tracing::trace!(id = %id, level, "constructed node");
        node
    }

    pub fn node(&self, id: PageId) -> Arc<NodePage> {
        Arc::clone(&self.pages.read()[id.0 as usize])
    }

    pub fn node_count(&self) -> usize {
        self.pages.read().len()
    }
}
