//! # Eager Adoption
//!
//! Adoption moves a (parent, child-with-foster) configuration to a
//! (parent-with-new-separator, child) configuration: the parent absorbs
//! the child's foster child as a regular child by taking a separator
//! record, and the child's foster link is severed.
//!
//! The policy here is eager: every traversal that descends through a
//! parent whose chosen child carries a foster child attempts the
//! adoption. Under mixed read/write workloads foster chains are therefore
//! short-lived; they exist only in the window between a split and the
//! next traversal through the parent.
//!
//! ## Latching
//!
//! The traversal arrives holding the parent in shared mode and the child
//! in shared or (for a leaf on the write path) exclusive mode. Adoption
//! upgrades both latches via `attempt_upgrade`, which never waits: if
//! either upgrade fails, the adoption is abandoned and the traversal
//! proceeds without structural change. It will be retried by the next
//! traversal.
//!
//! While the parent is held exclusively, any page it sprouts during the
//! adoption (a split half, or the demoted child of a root growth) is
//! reachable only through the parent, so those pages are write-latched
//! uncontended and released as soon as the separator insert lands.

use std::sync::Arc;

use crate::encoding::KeyCodec;
use crate::logging::{LogCtx, LogKind, TreeLogger};
use crate::node::foster;
use crate::node::mgr::{NodeManager, NodePage, PageId};
use crate::node::ops::{self, InsertOutcome};

/// Adoption policy shared by all traversals of one tree.
pub struct EagerAdoption {
    mgr: Arc<NodeManager>,
    root: PageId,
}

impl EagerAdoption {
    pub fn new(mgr: Arc<NodeManager>, root: PageId) -> Self {
        Self { mgr, root }
    }

    /// Attempts to make `parent` adopt `child`'s foster child.
    ///
    /// Expects the parent latched shared and the child latched shared, or
    /// exclusive when `child_exclusive`. Latch modes are restored before
    /// returning. Returns whether the tree structure changed.
    pub fn try_adopt<K: KeyCodec>(
        &self,
        parent: &NodePage,
        child: &NodePage,
        child_exclusive: bool,
        logger: &dyn TreeLogger,
    ) -> bool {
        // Latch held by the caller.
        let Some(foster_id) = foster::foster_child(unsafe { child.page() }) else {
            return false;
        };
        let Some(separator) = foster::effective_foster_key::<K>(unsafe { child.page() }) else {
            // A chain of empty nodes under an infinite high fence; nothing
            // sensible to adopt.
            return false;
        };

        if !parent.latch().attempt_upgrade() {
            return false;
        }
        let mut child_upgraded = false;
        if !child_exclusive {
            if !child.latch().attempt_upgrade() {
                parent.latch().downgrade();
                return false;
            }
            child_upgraded = true;
        }

        self.do_adopt::<K>(parent, child, foster_id, separator, logger);

        parent.latch().downgrade();
        if child_upgraded {
            child.latch().downgrade();
        }
        true
    }

    /// Inserts `(separator, foster_id)` into the parent, splitting it (or
    /// growing it, when the parent is the root) until the record fits,
    /// then severs the child's foster link. Runs with both latches held
    /// exclusively.
    fn do_adopt<K: KeyCodec>(
        &self,
        parent: &NodePage,
        child: &NodePage,
        foster_id: PageId,
        separator: K,
        logger: &dyn TreeLogger,
    ) {
        let mut target: Arc<NodePage> = self.mgr.node(parent.id());
        // Write latch we hold on `target` when it is not the caller's
        // parent; released on switch and at the end.
        let mut extra: Option<Arc<NodePage>> = None;

        loop {
            let log = LogCtx::new(logger, target.id());
            // INVARIANT: a separator is inserted exactly once per foster
            // child, so a duplicate here is a corrupted chain.
            let outcome =
                ops::insert::<K, PageId>(unsafe { target.page_mut() }, &separator, &foster_id, log)
                    .unwrap();
            match outcome {
                InsertOutcome::Inserted => break,
                InsertOutcome::PageFull if target.id() == self.root => {
                    // The root has no parent to adopt its own foster
                    // children; make the tree taller instead.
                    let level = unsafe { target.page() }.level();
                    let demoted = self.mgr.construct_node(level);
                    demoted.latch().acquire_write();
                    foster::grow::<K, PageId>(
                        unsafe { target.page_mut() },
                        unsafe { demoted.page_mut() },
                        demoted.id(),
                        log,
                    );
                    tracing::trace!(root = %target.id(), child = %demoted.id(), "tree grew");
                    debug_assert!(extra.is_none());
                    extra = Some(Arc::clone(&demoted));
                    target = demoted;
                }
                InsertOutcome::PageFull => {
                    let level = unsafe { target.page() }.level();
                    let sibling = self.mgr.construct_node(level);
                    sibling.latch().acquire_write();
                    // INVARIANT: the sibling is freshly constructed and empty.
                    foster::split::<K, PageId>(
                        unsafe { target.page_mut() },
                        unsafe { sibling.page_mut() },
                        sibling.id(),
                        log,
                    )
                    .unwrap();
                    if foster::key_range_contains(unsafe { target.page() }, &separator) {
                        sibling.latch().release_write();
                    } else {
                        if let Some(old) = extra.take() {
                            old.latch().release_write();
                        }
                        extra = Some(Arc::clone(&sibling));
                        target = sibling;
                    }
                }
            }
        }

        foster::unset_foster_child::<K>(unsafe { child.page_mut() });
        logger.log(child.id(), LogKind::Adopt, Some(&separator));
        tracing::trace!(
            parent = %parent.id(), child = %child.id(), foster = %foster_id,
            "adopted foster child"
        );

        if let Some(old) = extra.take() {
            old.latch().release_write();
        }
    }
}
