//! # Foster Node Protocol
//!
//! Fence keys, the foster key, and the foster child pointer turn a plain
//! slotted page into a Foster B-tree node. A node owns the key range
//! `[low_fence, high_fence]`; while a foster child is linked, the node
//! keeps only `[low_fence, foster_key)` and the chain hanging off the
//! foster pointer covers the rest. Splits happen entirely inside the node
//! (link an empty sibling, move half the records over) and a parent
//! absorbs the sibling later, so no split ever has to update two levels
//! at once.
//!
//! ## Field Storage
//!
//! The four fields live as payload entries pinned at the high end of the
//! heap; the header carries a validity bit and a payload pointer per
//! field. An invalid low or high fence means minus or plus infinity, an
//! invalid foster pointer means "no foster child", and an invalid foster
//! key while a foster child exists means the foster key equals the high
//! fence (the freshly-linked, still-empty child).
//!
//! ## Field Maintenance
//!
//! Setting a field keeps the metadata contiguous at the heap top:
//!
//! ```text
//! fresh field:  allocate at the very top (the whole occupied heap slides
//!               down), then shift every stored field pointer down
//! resize:       slide the blocks below the field by the size delta and
//!               re-point only the fields at or below it
//! unset:        free the payload and re-point the fields below it
//! ```
//!
//! Record-level allocations only ever touch the low end of the heap, so
//! they can never invalidate the fence/foster metadata.
//!
//! One payload block stays reserved for the foster pointer while it is
//! unset. A completely full node can therefore always link an empty
//! foster child: the new child carries no records, and its foster key is
//! omitted because it equals the high fence.

use crate::encoding::{KeyCodec, ValueCodec};
use crate::error::{Error, Result};
use crate::logging::{LogCtx, LogKind};
use crate::node::mgr::PageId;
use crate::node::ops;
use crate::page::slotted::{payload_blocks, SlottedPage};

/// The four foster metadata fields, in header order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FosterField {
    LowFence = 0,
    HighFence = 1,
    FosterKey = 2,
    FosterPtr = 3,
}

const PAGE_ID_LEN: usize = 4;

const _: () = assert!(
    FosterField::FosterPtr as usize == crate::page::slotted::FOSTER_PTR_FIELD,
    "reserve accounting and field numbering must agree"
);

// ---------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------

fn get_key_field<K: KeyCodec>(page: &SlottedPage, field: FosterField) -> Option<K> {
    let f = field as usize;
    page.field_valid(f)
        .then(|| K::decode_full(page.payload(page.field_ptr(f))))
}

/// Low fence key; `None` is minus infinity.
pub fn low_fence<K: KeyCodec>(page: &SlottedPage) -> Option<K> {
    get_key_field(page, FosterField::LowFence)
}

/// High fence key; `None` is plus infinity.
pub fn high_fence<K: KeyCodec>(page: &SlottedPage) -> Option<K> {
    get_key_field(page, FosterField::HighFence)
}

/// The stored foster key field. Usually what you want is
/// [`effective_foster_key`], which resolves the omitted-key case.
pub fn foster_key<K: KeyCodec>(page: &SlottedPage) -> Option<K> {
    get_key_field(page, FosterField::FosterKey)
}

/// The foster child pointer, if one is linked.
pub fn foster_child(page: &SlottedPage) -> Option<PageId> {
    let f = FosterField::FosterPtr as usize;
    page.field_valid(f)
        .then(|| PageId::decode_value(page.payload(page.field_ptr(f))))
}

/// The separator between this node and its foster chain: the stored
/// foster key, or the high fence when the key is omitted (empty child).
/// `None` means plus infinity. Only meaningful while a foster child is
/// linked.
pub fn effective_foster_key<K: KeyCodec>(page: &SlottedPage) -> Option<K> {
    foster_key::<K>(page).or_else(|| high_fence::<K>(page))
}

/// Whether `key` lies within the fence bounds (inclusive on both ends).
pub fn fence_contains<K: KeyCodec>(page: &SlottedPage, key: &K) -> bool {
    if let Some(low) = low_fence::<K>(page) {
        if *key < low {
            return false;
        }
    }
    if let Some(high) = high_fence::<K>(page) {
        if *key > high {
            return false;
        }
    }
    true
}

/// Stricter than [`fence_contains`]: false when the key belongs to this
/// node's foster chain rather than the node itself.
pub fn key_range_contains<K: KeyCodec>(page: &SlottedPage, key: &K) -> bool {
    if !fence_contains(page, key) {
        return false;
    }
    if foster_child(page).is_some() {
        match effective_foster_key::<K>(page) {
            Some(fk) => *key < fk,
            None => true,
        }
    } else {
        true
    }
}

// ---------------------------------------------------------------------
// Field maintenance
// ---------------------------------------------------------------------

fn set_field_raw(
    page: &mut SlottedPage,
    field: FosterField,
    new_len: usize,
    old_len: impl FnOnce(&[u8]) -> usize,
    write: impl FnOnce(&mut [u8]),
) -> bool {
    let f = field as usize;
    let new_blocks = payload_blocks(new_len) as i32;
    if !page.field_valid(f) {
        let Some(ptr) = page.allocate_end_payload(new_len) else {
            return false;
        };
        page.shift_all_field_ptrs(-new_blocks);
        page.set_field(f, ptr);
    } else {
        let old_ptr = page.field_ptr(f);
        let old_blocks = payload_blocks(old_len(page.payload(old_ptr))) as i32;
        if old_blocks != new_blocks {
            let diff = old_blocks - new_blocks;
            let from = page.payload_begin();
            let count = old_ptr - from;
            let to = (from as i32 + diff) as u16;
            if !page.shift_payloads(to, from, count) {
                return false;
            }
            page.shift_field_ptrs_at_or_below(old_ptr, diff);
        }
    }
    let ptr = page.field_ptr(f);
    write(&mut page.payload_mut(ptr)[..new_len]);
    true
}

fn set_key_field<K: KeyCodec>(page: &mut SlottedPage, field: FosterField, key: &K) -> bool {
    debug_assert!(field as usize != FosterField::FosterPtr as usize);
    set_field_raw(page, field, key.full_len(), K::full_len_in, |buf| {
        key.encode_full(buf)
    })
}

fn set_ptr_field(page: &mut SlottedPage, id: PageId) -> bool {
    set_field_raw(
        page,
        FosterField::FosterPtr,
        PAGE_ID_LEN,
        |_| PAGE_ID_LEN,
        |buf| id.encode_value(buf),
    )
}

fn unset_field_raw(page: &mut SlottedPage, field: FosterField, len_of: impl FnOnce(&[u8]) -> usize) {
    let f = field as usize;
    if !page.field_valid(f) {
        return;
    }
    let ptr = page.field_ptr(f);
    let length = len_of(page.payload(ptr));
    page.clear_field(f);
    page.free_payload(ptr, length);
    page.shift_field_ptrs_below(ptr, payload_blocks(length) as i32);
}

fn unset_key_field<K: KeyCodec>(page: &mut SlottedPage, field: FosterField) {
    unset_field_raw(page, field, K::full_len_in);
}

fn unset_ptr_field(page: &mut SlottedPage) {
    unset_field_raw(page, FosterField::FosterPtr, |_| PAGE_ID_LEN);
}

// ---------------------------------------------------------------------
// Split machinery
// ---------------------------------------------------------------------

/// Links `child` (which must be empty) as `page`'s foster child.
///
/// The child inherits the node's high fence as both of its fences, and
/// the node's existing foster key and pointer move to the child, so an
/// existing chain is spliced behind the newcomer. The node's own foster
/// key is omitted: an empty child's foster key equals its high fence,
/// which keeps the space needed on a full node down to the single
/// reserved block for the pointer.
pub fn add_foster_child<K: KeyCodec>(
    page: &mut SlottedPage,
    child: &mut SlottedPage,
    child_id: PageId,
) -> Result<()> {
    if child.slot_count() != 0 || foster_child(child).is_some() {
        return Err(Error::InvalidFosterChild(child_id.to_string()));
    }

    if let Some(high) = high_fence::<K>(page) {
        let ok = set_key_field(child, FosterField::LowFence, &high)
            && set_key_field(child, FosterField::HighFence, &high);
        assert!(ok, "fence keys must fit in an empty foster child");
    }
    if let Some(old_foster_key) = foster_key::<K>(page) {
        assert!(
            set_key_field(child, FosterField::FosterKey, &old_foster_key),
            "foster key must fit in an empty foster child"
        );
    }
    if let Some(old_foster_ptr) = foster_child(page) {
        assert!(
            set_ptr_field(child, old_foster_ptr),
            "foster pointer must fit in an empty foster child"
        );
    }

    unset_key_field::<K>(page, FosterField::FosterKey);
    assert!(
        set_ptr_field(page, child_id),
        "reserved block guarantees space for a foster pointer"
    );
    Ok(())
}

/// Moves the upper half of `page`'s records into its (empty) foster
/// child and installs the split key as the separator.
pub fn rebalance<K: KeyCodec, V: ValueCodec>(
    page: &mut SlottedPage,
    child: &mut SlottedPage,
    log: LogCtx<'_>,
) {
    debug_assert!(foster_child(page).is_some());
    debug_assert_eq!(child.slot_count(), 0);

    let slot_count = page.slot_count();
    let split_slot = slot_count / 2;
    debug_assert!(split_slot > 0, "cannot rebalance fewer than two records");
    let split_key: K = ops::read_key(page, split_slot);

    log.log(LogKind::Rebalance, Some(&split_key));

    let moved = ops::move_records::<K, V>(child, 0, page, split_slot, slot_count - split_slot);
    assert!(moved, "half of a node must fit into an empty foster child");

    assert!(set_key_field(page, FosterField::FosterKey, &split_key));
    assert!(set_key_field(child, FosterField::LowFence, &split_key));
    if let Some(high) = high_fence::<K>(page) {
        assert!(set_key_field(child, FosterField::HighFence, &high));
    }

    #[cfg(feature = "verify-invariants")]
    {
        assert!(all_keys_in_range::<K>(page));
        assert!(all_keys_in_range::<K>(child));
    }
}

/// In-place node split: link an empty foster child, then rebalance into
/// it. The caller decides afterwards which half covers its key.
pub fn split<K: KeyCodec, V: ValueCodec>(
    page: &mut SlottedPage,
    child: &mut SlottedPage,
    child_id: PageId,
    log: LogCtx<'_>,
) -> Result<()> {
    add_foster_child::<K>(page, child, child_id)?;
    rebalance::<K, V>(page, child, log);
    Ok(())
}

/// Severs the foster link after adoption: the foster key becomes the new
/// high fence and both foster fields are dropped.
pub fn unset_foster_child<K: KeyCodec>(page: &mut SlottedPage) {
    if foster_child(page).is_none() {
        return;
    }
    if let Some(fk) = foster_key::<K>(page) {
        unset_key_field::<K>(page, FosterField::FosterKey);
        assert!(
            set_key_field(page, FosterField::HighFence, &fk),
            "freed foster key must cover the new high fence"
        );
    }
    // Omitted foster key: it already equals the high fence.
    unset_ptr_field(page);
}

/// Makes the tree one level taller without changing the root's identity:
/// the root's records, fences, and foster link are demoted into `child`,
/// and the root becomes a branch with a single separator at the minimum
/// key sentinel.
pub fn grow<K: KeyCodec, V: ValueCodec>(
    root: &mut SlottedPage,
    child: &mut SlottedPage,
    child_id: PageId,
    log: LogCtx<'_>,
) {
    debug_assert_eq!(child.slot_count(), 0);
    debug_assert_eq!(child.level(), root.level());

    let moved = ops::move_records::<K, V>(child, 0, root, 0, root.slot_count());
    assert!(moved, "root contents must fit into an empty page of equal size");

    if let Some(low) = low_fence::<K>(root) {
        assert!(set_key_field(child, FosterField::LowFence, &low));
    }
    if let Some(high) = high_fence::<K>(root) {
        assert!(set_key_field(child, FosterField::HighFence, &high));
    }
    if let Some(fk) = foster_key::<K>(root) {
        assert!(set_key_field(child, FosterField::FosterKey, &fk));
    }
    if let Some(fp) = foster_child(root) {
        assert!(set_ptr_field(child, fp));
    }
    unset_key_field::<K>(root, FosterField::FosterKey);
    unset_ptr_field(root);

    root.set_level(child.level() + 1);
    log.log(LogKind::Grow, None);

    // INVARIANT: the root is empty at this point, so the sentinel insert
    // cannot fail or collide.
    let outcome = ops::insert::<K, PageId>(root, &K::min_value(), &child_id, log).unwrap();
    assert_eq!(outcome, ops::InsertOutcome::Inserted);
}

/// Whether every record of the node lies inside its own key range.
/// Debugging/testing helper.
pub fn all_keys_in_range<K: KeyCodec>(page: &SlottedPage) -> bool {
    (0..page.slot_count()).all(|i| key_range_contains(page, &ops::read_key::<K>(page, i)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoopLogger;
    use crate::node::ops::{insert, read_key, read_slot, InsertOutcome};
    use crate::page::slotted::SlottedPage;

    static NOOP: NoopLogger = NoopLogger;

    fn log() -> LogCtx<'static> {
        LogCtx::new(&NOOP, PageId::new(0))
    }

    #[test]
    fn fences_default_to_infinity() {
        let page = SlottedPage::new_boxed(0);
        assert_eq!(low_fence::<String>(&page), None);
        assert_eq!(high_fence::<String>(&page), None);
        assert!(fence_contains(&page, &String::new()));
        assert!(fence_contains(&page, &"zzz".to_string()));
        assert!(key_range_contains(&page, &"anything".to_string()));
    }

    #[test]
    fn fence_containment_is_inclusive() {
        let mut page = SlottedPage::new_boxed(0);
        assert!(set_key_field(&mut page, FosterField::LowFence, &"d".to_string()));
        assert!(set_key_field(&mut page, FosterField::HighFence, &"m".to_string()));

        assert!(!fence_contains(&page, &"c".to_string()));
        assert!(fence_contains(&page, &"d".to_string()));
        assert!(fence_contains(&page, &"h".to_string()));
        assert!(fence_contains(&page, &"m".to_string()));
        assert!(!fence_contains(&page, &"n".to_string()));
    }

    #[test]
    fn key_field_resize_keeps_other_fields_and_records_intact() {
        let mut page = SlottedPage::new_boxed(0);
        insert::<String, String>(&mut page, &"rec".into(), &"value".into(), log()).unwrap();

        assert!(set_key_field(&mut page, FosterField::LowFence, &"a".to_string()));
        assert!(set_key_field(&mut page, FosterField::HighFence, &"b".to_string()));
        // Grow the low fence well past one block, then shrink it again.
        let long = "x".repeat(40);
        assert!(set_key_field(&mut page, FosterField::LowFence, &long));
        assert_eq!(low_fence::<String>(&page), Some(long));
        assert_eq!(high_fence::<String>(&page), Some("b".to_string()));
        assert_eq!(
            read_slot::<String, String>(&page, 0),
            ("rec".into(), "value".into())
        );

        assert!(set_key_field(&mut page, FosterField::LowFence, &"a".to_string()));
        assert_eq!(low_fence::<String>(&page), Some("a".to_string()));
        assert_eq!(high_fence::<String>(&page), Some("b".to_string()));
        assert_eq!(
            read_slot::<String, String>(&page, 0),
            ("rec".into(), "value".into())
        );
    }

    #[test]
    fn unset_field_repoints_fields_below_it() {
        let mut page = SlottedPage::new_boxed(0);
        assert!(set_key_field(&mut page, FosterField::LowFence, &"low".to_string()));
        assert!(set_key_field(&mut page, FosterField::HighFence, &"high".to_string()));
        assert!(set_key_field(&mut page, FosterField::FosterKey, &"mid".to_string()));

        unset_key_field::<String>(&mut page, FosterField::HighFence);

        assert_eq!(low_fence::<String>(&page), Some("low".to_string()));
        assert_eq!(high_fence::<String>(&page), None);
        assert_eq!(foster_key::<String>(&page), Some("mid".to_string()));
    }

    #[test]
    fn add_foster_child_rejects_a_non_empty_child() {
        let mut page = SlottedPage::new_boxed(0);
        let mut child = SlottedPage::new_boxed(0);
        insert::<String, String>(&mut child, &"k".into(), &"v".into(), log()).unwrap();

        let err = add_foster_child::<String>(&mut page, &mut child, PageId::new(9)).unwrap_err();
        assert!(matches!(err, Error::InvalidFosterChild(_)));
    }

    #[test]
    fn a_full_page_can_always_take_an_empty_foster_child() {
        let mut page = SlottedPage::new_boxed(0);
        let mut key = 0u64;
        while insert::<u64, String>(&mut page, &key, &"x".repeat(32), log()).unwrap()
            == InsertOutcome::Inserted
        {
            key += 1;
        }

        let mut child = SlottedPage::new_boxed(0);
        add_foster_child::<u64>(&mut page, &mut child, PageId::new(1)).unwrap();
        assert_eq!(foster_child(&page), Some(PageId::new(1)));
        // Foster key omitted on the node; effective key falls back to the
        // (infinite) high fence.
        assert_eq!(foster_key::<u64>(&page), None);
    }

    #[test]
    fn split_halves_records_and_links_the_separator() {
        let mut page = SlottedPage::new_boxed(0);
        for i in 0..100u64 {
            insert::<u64, u64>(&mut page, &i, &(i * 2), log()).unwrap();
        }
        let mut child = SlottedPage::new_boxed(0);
        split::<u64, u64>(&mut page, &mut child, PageId::new(7), log()).unwrap();

        assert_eq!(page.slot_count(), 50);
        assert_eq!(child.slot_count(), 50);
        assert_eq!(foster_child(&page), Some(PageId::new(7)));
        assert_eq!(foster_key::<u64>(&page), Some(50));
        assert_eq!(low_fence::<u64>(&child), Some(50));
        assert_eq!(high_fence::<u64>(&child), None);

        assert!(key_range_contains(&page, &49u64));
        assert!(!key_range_contains(&page, &50u64));
        assert!(fence_contains(&page, &50u64));
        assert!(key_range_contains(&child, &50u64));

        assert!(all_keys_in_range::<u64>(&page));
        assert!(all_keys_in_range::<u64>(&child));
        for i in 0..50u64 {
            assert_eq!(read_key::<u64>(&page, i as u16), i);
            assert_eq!(read_key::<u64>(&child, i as u16), 50 + i);
        }
    }

    #[test]
    fn second_split_splices_the_chain_in_order() {
        let mut page = SlottedPage::new_boxed(0);
        for i in 0..100u64 {
            insert::<u64, u64>(&mut page, &i, &i, log()).unwrap();
        }
        let mut c1 = SlottedPage::new_boxed(0);
        split::<u64, u64>(&mut page, &mut c1, PageId::new(1), log()).unwrap();
        let mut c2 = SlottedPage::new_boxed(0);
        split::<u64, u64>(&mut page, &mut c2, PageId::new(2), log()).unwrap();

        // page -> c2 -> c1 by pointer, ranges [0,25) [25,50) [50,inf).
        assert_eq!(foster_child(&page), Some(PageId::new(2)));
        assert_eq!(foster_child(&c2), Some(PageId::new(1)));
        assert_eq!(foster_key::<u64>(&page), Some(25));
        assert_eq!(low_fence::<u64>(&c2), Some(25));
        assert_eq!(foster_key::<u64>(&c2), Some(50));
        assert_eq!(low_fence::<u64>(&c1), Some(50));

        assert!(key_range_contains(&page, &10u64));
        assert!(key_range_contains(&c2, &30u64));
        assert!(!key_range_contains(&c2, &60u64));
        assert!(key_range_contains(&c1, &60u64));
    }

    #[test]
    fn unset_foster_child_promotes_the_foster_key_to_high_fence() {
        let mut page = SlottedPage::new_boxed(0);
        for i in 0..10u64 {
            insert::<u64, u64>(&mut page, &i, &i, log()).unwrap();
        }
        let mut child = SlottedPage::new_boxed(0);
        split::<u64, u64>(&mut page, &mut child, PageId::new(3), log()).unwrap();

        unset_foster_child::<u64>(&mut page);

        assert_eq!(foster_child(&page), None);
        assert_eq!(foster_key::<u64>(&page), None);
        assert_eq!(high_fence::<u64>(&page), Some(5));
        assert!(key_range_contains(&page, &4u64));
        assert!(!key_range_contains(&page, &6u64));
    }

    #[test]
    fn grow_demotes_the_root_into_a_child() {
        let mut root = SlottedPage::new_boxed(0);
        for i in 0..20u64 {
            insert::<u64, u64>(&mut root, &i, &i, log()).unwrap();
        }
        let mut overflow = SlottedPage::new_boxed(0);
        split::<u64, u64>(&mut root, &mut overflow, PageId::new(1), log()).unwrap();

        let mut child = SlottedPage::new_boxed(0);
        grow::<u64, u64>(&mut root, &mut child, PageId::new(2), log());

        assert_eq!(root.level(), 1);
        assert_eq!(root.slot_count(), 1);
        assert_eq!(read_key::<u64>(&root, 0), 0);
        assert_eq!(foster_child(&root), None);

        // The demoted child carries the records and the old foster link.
        assert_eq!(child.level(), 0);
        assert_eq!(child.slot_count(), 10);
        assert_eq!(foster_child(&child), Some(PageId::new(1)));
        assert_eq!(foster_key::<u64>(&child), Some(10));
    }
}
