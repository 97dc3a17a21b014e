//! # Foster B-tree
//!
//! The tree layer ties the node machinery together: root-to-leaf
//! traversal with latch coupling, the public put/get/remove operations,
//! eager adoption of foster children, and root growth.
//!
//! ## Traversal
//!
//! ```text
//! 1. Read-latch the root.
//! 2. At a branch: walk sideways through the foster chain (latch the
//!    sibling, release the current node) until the node's key range
//!    covers the key, find the child whose separator covers the key,
//!    latch it (shared, or exclusive for a leaf on the write path),
//!    attempt adoption, release the parent, descend.
//! 3. At the leaf level: upgrade to a write latch if needed, walk the
//!    foster chain the same way, and return the latched leaf.
//! ```
//!
//! At most two latches are held at a time, the second only during the
//! crabbing hand-over, and latches are always taken top-down and
//! left-to-right, which rules out deadlock.
//!
//! ## Splits and Growth
//!
//! A full leaf splits in place by linking a foster child; the parent
//! learns about it on a later traversal through adoption. The root has no
//! parent, so a root with a foster chain grows instead: its contents are
//! demoted into a fresh child and the root page itself becomes a branch
//! one level up. The root page identity never changes, so there is no
//! root pointer to update and no race window around it.
//!
//! ## Ordering Guarantees
//!
//! Per key, operations are sequentially consistent as observed through
//! the latch protocol: a put that completes before a get starts is
//! visible to that get. No global order across keys is promised.

pub mod adoption;

use std::marker::PhantomData;
use std::sync::Arc;

use crate::encoding::{KeyCodec, ValueCodec};
use crate::error::Result;
use crate::logging::{LogCtx, NoopLogger, TreeLogger};
use crate::node::foster;
use crate::node::mgr::{NodeManager, NodePage, PageId};
use crate::node::ops::{self, FindOutcome, InsertOutcome};
use crate::page::slotted::SlottedPage;

use adoption::EagerAdoption;

/// Snapshot of one node's metadata, taken under its read latch.
/// Debugging/testing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo<K> {
    pub id: PageId,
    pub level: u8,
    pub slot_count: u16,
    pub low_fence: Option<K>,
    pub high_fence: Option<K>,
    pub foster_key: Option<K>,
    pub foster_child: Option<PageId>,
}

/// A concurrent, in-memory ordered map backed by a Foster B-tree.
///
/// Safe to share across threads (`&Tree` is enough; no external locking).
/// A single record must fit in half a page alongside its slot; oversize
/// records make the insert's split loop fail an internal assertion.
pub struct Tree<K, V> {
    mgr: Arc<NodeManager>,
    adoption: EagerAdoption,
    logger: Arc<dyn TreeLogger>,
    root: PageId,
    _codec: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValueCodec> Default for Tree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeyCodec, V: ValueCodec> Tree<K, V> {
    /// An empty tree: a single level-0 root leaf with open fences.
    pub fn new() -> Self {
        Self::with_logger(Arc::new(NoopLogger))
    }

    /// An empty tree reporting every operation to `logger`.
    pub fn with_logger(logger: Arc<dyn TreeLogger>) -> Self {
        let mgr = Arc::new(NodeManager::new());
        let root = mgr.construct_node(0).id();
        let adoption = EagerAdoption::new(Arc::clone(&mgr), root);
        Self {
            mgr,
            adoption,
            logger,
            root,
            _codec: PhantomData,
        }
    }

    pub fn root_id(&self) -> PageId {
        self.root
    }

    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.mgr
    }

    /// Inserts `key`. Without `upsert`, an existing key is a
    /// [`DuplicateKey`](crate::error::Error::DuplicateKey) error; with it,
    /// the old pair is replaced.
    pub fn put(&self, key: K, value: V, upsert: bool) -> Result<()> {
        let mut leaf = self.traverse(&key, true);

        if upsert {
            let log = LogCtx::new(&*self.logger, leaf.id());
            // INVARIANT: a non-strict remove cannot fail.
            ops::remove::<K, V>(unsafe { leaf.page_mut() }, &key, false, log).unwrap();
        }

        loop {
            let log = LogCtx::new(&*self.logger, leaf.id());
            match ops::insert::<K, V>(unsafe { leaf.page_mut() }, &key, &value, log) {
                Err(err) => {
                    leaf.latch().release_write();
                    return Err(err);
                }
                Ok(InsertOutcome::Inserted) => break,
                Ok(InsertOutcome::PageFull) => {
                    let sibling = self.mgr.construct_node(0);
                    sibling.latch().acquire_write();
                    // INVARIANT: a fresh sibling is empty.
                    foster::split::<K, V>(
                        unsafe { leaf.page_mut() },
                        unsafe { sibling.page_mut() },
                        sibling.id(),
                        log,
                    )
                    .unwrap();

                    if leaf.id() == self.root {
                        // A root leaf has no parent to adopt its foster
                        // child; grow the tree right away.
                        let demoted = self.mgr.construct_node(0);
                        demoted.latch().acquire_write();
                        foster::grow::<K, V>(
                            unsafe { leaf.page_mut() },
                            unsafe { demoted.page_mut() },
                            demoted.id(),
                            log,
                        );
                        tracing::trace!(root = %leaf.id(), "tree grew from leaf root");
                        let covered =
                            foster::key_range_contains(unsafe { demoted.page() }, &key);
                        leaf.latch().release_write();
                        if covered {
                            sibling.latch().release_write();
                            leaf = demoted;
                        } else {
                            demoted.latch().release_write();
                            leaf = sibling;
                        }
                    } else if foster::key_range_contains(unsafe { leaf.page() }, &key) {
                        sibling.latch().release_write();
                    } else {
                        debug_assert!(foster::key_range_contains(
                            unsafe { sibling.page() },
                            &key
                        ));
                        leaf.latch().release_write();
                        leaf = sibling;
                    }
                }
            }
        }

        leaf.latch().release_write();
        Ok(())
    }

    /// Point lookup. Total: an absent key is `None`, never an error.
    pub fn get(&self, key: &K) -> Option<V> {
        let leaf = self.traverse(key, false);
        let page = unsafe { leaf.page() };
        let value = match ops::find::<K>(page, key) {
            FindOutcome::Found { value_pos, .. } => {
                Some(V::decode_value(page.bytes_from(value_pos)))
            }
            FindOutcome::NotFound { .. } => None,
        };
        leaf.latch().release_read();
        value
    }

    /// Removes `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let leaf = self.traverse(key, true);
        let log = LogCtx::new(&*self.logger, leaf.id());
        // INVARIANT: a non-strict remove cannot fail.
        let removed = ops::remove::<K, V>(unsafe { leaf.page_mut() }, key, false, log).unwrap();
        leaf.latch().release_write();
        removed
    }

    /// Removes `key`; an absent key is a
    /// [`KeyNotFound`](crate::error::Error::KeyNotFound) error.
    pub fn remove_strict(&self, key: &K) -> Result<()> {
        let leaf = self.traverse(key, true);
        let log = LogCtx::new(&*self.logger, leaf.id());
        let result = ops::remove::<K, V>(unsafe { leaf.page_mut() }, key, true, log);
        leaf.latch().release_write();
        result.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Descends to the leaf covering `key`, latch-coupling downward and
    /// sideways. The returned leaf is write-latched when `for_update`,
    /// read-latched otherwise.
    fn traverse(&self, key: &K, for_update: bool) -> Arc<NodePage> {
        let mut node = self.mgr.node(self.root);
        node.latch().acquire_read();
        let mut exclusive = false;

        loop {
            let level = unsafe { node.page() }.level();
            if level == 0 {
                if for_update && !exclusive {
                    if node.latch().attempt_upgrade() {
                        exclusive = true;
                    } else {
                        node.latch().release_read();
                        node.latch().acquire_write();
                        exclusive = true;
                        if unsafe { node.page() }.level() != 0 {
                            // The root grew while we re-latched; restart
                            // this node as a branch.
                            node.latch().downgrade();
                            exclusive = false;
                            continue;
                        }
                    }
                }
                node = self.walk_foster_chain(node, key, exclusive);
                return node;
            }

            // Branch level; shared latch held.
            node = self.walk_foster_chain(node, key, false);

            let child_id = Self::child_of(unsafe { node.page() }, key);
            let child = self.mgr.node(child_id);
            let child_exclusive = for_update && level == 1;
            if child_exclusive {
                child.latch().acquire_write();
            } else {
                child.latch().acquire_read();
            }

            if self
                .adoption
                .try_adopt::<K>(&node, &child, child_exclusive, &*self.logger)
            {
                // The adopted separator may change which child covers the
                // key; restart on the same branch.
                if child_exclusive {
                    child.latch().release_write();
                } else {
                    child.latch().release_read();
                }
                continue;
            }

            node.latch().release_read();
            node = child;
            exclusive = child_exclusive;
        }
    }

    /// Latch-couples sideways until `node`'s own key range covers `key`.
    fn walk_foster_chain(
        &self,
        mut node: Arc<NodePage>,
        key: &K,
        exclusive: bool,
    ) -> Arc<NodePage> {
        loop {
            if foster::key_range_contains(unsafe { node.page() }, key) {
                return node;
            }
            // INVARIANT: every visited node fence-contains the key, so a
            // key outside the range implies a foster chain to follow.
            let foster_id = foster::foster_child(unsafe { node.page() }).unwrap();
            let sibling = self.mgr.node(foster_id);
            if exclusive {
                sibling.latch().acquire_write();
                node.latch().release_write();
            } else {
                sibling.latch().acquire_read();
                node.latch().release_read();
            }
            node = sibling;
        }
    }

    /// The child whose key range covers `key`: the value of the matching
    /// separator, or of the separator immediately to its left.
    fn child_of(page: &SlottedPage, key: &K) -> PageId {
        match ops::find::<K>(page, key) {
            FindOutcome::Found { value_pos, .. } => PageId::decode_value(page.bytes_from(value_pos)),
            FindOutcome::NotFound {
                prev_value_pos: Some(pos),
                ..
            } => PageId::decode_value(page.bytes_from(pos)),
            FindOutcome::NotFound {
                prev_value_pos: None,
                ..
            } => unreachable!("branch node has no separator at or below the key"),
        }
    }

    // ------------------------------------------------------------------
    // Debugging surface
    // ------------------------------------------------------------------

    /// Snapshot of one node's metadata. Debugging/testing helper.
    pub fn node_info(&self, id: PageId) -> NodeInfo<K> {
        let node = self.mgr.node(id);
        node.latch().acquire_read();
        let page = unsafe { node.page() };
        let info = NodeInfo {
            id,
            level: page.level(),
            slot_count: page.slot_count(),
            low_fence: foster::low_fence(page),
            high_fence: foster::high_fence(page),
            foster_key: foster::foster_key(page),
            foster_child: foster::foster_child(page),
        };
        node.latch().release_read();
        info
    }

    /// All pairs of one leaf, in slot order. Debugging/testing helper.
    pub fn read_node(&self, id: PageId) -> Vec<(K, V)> {
        let node = self.mgr.node(id);
        node.latch().acquire_read();
        let page = unsafe { node.page() };
        debug_assert_eq!(page.level(), 0, "read_node targets leaves");
        let pairs = ops::iterate::<K, V>(page).collect();
        node.latch().release_read();
        pairs
    }

    /// All separators of one branch, in slot order. Debugging/testing
    /// helper.
    pub fn branch_entries(&self, id: PageId) -> Vec<(K, PageId)> {
        let node = self.mgr.node(id);
        node.latch().acquire_read();
        let page = unsafe { node.page() };
        debug_assert!(page.level() > 0, "branch_entries targets branches");
        let entries = ops::iterate::<K, PageId>(page).collect();
        node.latch().release_read();
        entries
    }

    /// Verifies the structural invariants of every node reachable from
    /// the root: sortedness, key-range containment, foster-link fence
    /// agreement, and separator/fence agreement on branch children.
    /// Panics on the first violation. Debugging/testing helper.
    pub fn check_invariants(&self) {
        self.check_node(self.root);
    }

    fn check_node(&self, id: PageId) {
        let node = self.mgr.node(id);
        node.latch().acquire_read();
        let page = unsafe { node.page() };
        let level = page.level();

        assert!(ops::is_sorted::<K>(page), "{id}: slots out of key order");
        assert!(
            foster::all_keys_in_range::<K>(page),
            "{id}: keys escape the node's range"
        );

        if let Some(foster_id) = foster::foster_child(page) {
            let separator = foster::effective_foster_key::<K>(page);
            let high = foster::high_fence::<K>(page);
            let sibling = self.mgr.node(foster_id);
            sibling.latch().acquire_read();
            let spage = unsafe { sibling.page() };
            assert_eq!(
                foster::low_fence::<K>(spage),
                separator,
                "{id} -> {foster_id}: foster key disagrees with low fence"
            );
            assert_eq!(
                foster::high_fence::<K>(spage),
                high,
                "{id} -> {foster_id}: high fences disagree"
            );
            assert_eq!(spage.level(), level, "{id} -> {foster_id}: level mismatch");
            sibling.latch().release_read();
        }

        let foster_id = foster::foster_child(page);
        let children: Vec<(K, PageId)> = if level > 0 {
            ops::iterate::<K, PageId>(page).collect()
        } else {
            Vec::new()
        };
        let low = foster::low_fence::<K>(page);
        node.latch().release_read();

        if let Some(foster_id) = foster_id {
            self.check_node(foster_id);
        }

        for (i, (separator, child_id)) in children.iter().enumerate() {
            let child = self.mgr.node(*child_id);
            child.latch().acquire_read();
            let cpage = unsafe { child.page() };
            assert_eq!(
                cpage.level() + 1,
                level,
                "{id} -> {child_id}: child level mismatch"
            );
            let child_low = foster::low_fence::<K>(cpage);
            child.latch().release_read();

            if i == 0 && low.is_none() {
                // Leftmost path: the sentinel separator stands in for an
                // unbounded low fence on the child.
                assert_eq!(*separator, K::min_value(), "{id}: leftmost separator");
            } else {
                assert_eq!(
                    child_low.as_ref(),
                    Some(separator),
                    "{id} -> {child_id}: separator disagrees with child low fence"
                );
            }
            self.check_node(*child_id);
        }
    }
}
