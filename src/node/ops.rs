//! # Node Operations
//!
//! Stateless functions over a slotted page: ordered insertion, search,
//! removal, iteration, and the atomic group move that underlies node
//! splits. All functions are generic over the key and value codecs, so the
//! same code serves leaves (`V` = user value) and branches (`V` =
//! [`PageId`](crate::node::mgr::PageId)).
//!
//! ## Search Algorithm
//!
//! 1. Binary-search the slot vector on the 2-byte PMNK (fast integer
//!    comparison, no payload access).
//! 2. On a PMNK hit, decode full keys and walk forward while the PMNK
//!    still matches (a PMNK collision is inconclusive).
//! 3. Report `Found` with the value's byte offset, or `NotFound` with the
//!    insertion point and the *previous* slot's value offset. The latter
//!    is exactly what branch traversal needs: the child pointer
//!    immediately to the left of the searched key.
//!
//! ## Insertion Algorithm
//!
//! ```text
//! 1. Find insertion point (duplicate -> error)
//! 2. Allocate payload blocks (failure -> PageFull, page unchanged)
//! 3. Open a slot (failure -> free payload, PageFull)
//! 4. Write slot {pmnk, ptr, ghost=false}, encode the pair
//! 5. Hand the record to the logger
//! ```

use std::marker::PhantomData;

use crate::encoding::{
    decode_pair, encode_pair, payload_len_in, payload_len_of, KeyCodec, ValueCodec,
};
use crate::error::{Error, Result};
use crate::logging::{LogCtx, LogKind};
use crate::page::search::binary_search;
use crate::page::slotted::{Slot, SlottedPage};

/// Outcome of an insertion attempt. A full page is an ordinary condition
/// handled by the caller (split, adopt, or grow), never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    PageFull,
}

/// Outcome of a point search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    /// The key is at `slot`; its value bytes start at `value_pos` within
    /// the page data (zero-copy read).
    Found { slot: u16, value_pos: usize },
    /// The key is absent; it would be inserted at `slot`. When a previous
    /// slot exists, `prev_value_pos` locates its value bytes — the child
    /// pointer to follow when this page is a branch.
    NotFound {
        slot: u16,
        prev_value_pos: Option<usize>,
    },
}

/// Searches for `key`, resolving PMNK collisions with full-key walks.
pub fn find<K: KeyCodec>(page: &SlottedPage, key: &K) -> FindOutcome {
    let pmnk = key.pmnk();
    let (mut slot, exact) = binary_search(page, pmnk, 0, page.slot_count());
    if exact {
        while slot < page.slot_count() && page.slot(slot).pmnk() == pmnk {
            let payload = page.payload_for_slot(slot);
            let found = K::decode_key(payload, pmnk);
            match found.cmp(key) {
                std::cmp::Ordering::Equal => {
                    let value_pos = page.payload_offset_for_slot(slot) + K::key_len_in(payload);
                    return FindOutcome::Found { slot, value_pos };
                }
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Less => slot += 1,
            }
        }
    }
    let prev_value_pos = (slot > 0).then(|| {
        let payload = page.payload_for_slot(slot - 1);
        page.payload_offset_for_slot(slot - 1) + K::key_len_in(payload)
    });
    FindOutcome::NotFound {
        slot,
        prev_value_pos,
    }
}

/// Inserts a key-value pair in key order.
pub fn insert<K: KeyCodec, V: ValueCodec>(
    page: &mut SlottedPage,
    key: &K,
    value: &V,
    log: LogCtx<'_>,
) -> Result<InsertOutcome> {
    let slot = match find(page, key) {
        FindOutcome::Found { .. } => return Err(Error::DuplicateKey(format!("{key:?}"))),
        FindOutcome::NotFound { slot, .. } => slot,
    };

    let length = payload_len_of(key, value);
    let Some(ptr) = page.allocate_payload(length) else {
        return Ok(InsertOutcome::PageFull);
    };
    if !page.insert_slot(slot) {
        page.free_payload(ptr, length);
        return Ok(InsertOutcome::PageFull);
    }
    page.set_slot(slot, Slot::new(key.pmnk(), ptr, false));
    encode_pair(&mut page.payload_mut(ptr)[..length], key, value);

    log.log(LogKind::Insert, Some(key));

    #[cfg(feature = "verify-invariants")]
    assert!(is_sorted::<K>(page));

    Ok(InsertOutcome::Inserted)
}

/// Appends a pair without regard to order: the bulk-build mode. The page
/// is put back into search order with
/// [`SlottedPage::sort_slots`].
pub fn append<K: KeyCodec, V: ValueCodec>(
    page: &mut SlottedPage,
    key: &K,
    value: &V,
) -> InsertOutcome {
    let length = payload_len_of(key, value);
    let Some(ptr) = page.allocate_payload(length) else {
        return InsertOutcome::PageFull;
    };
    let slot = page.slot_count();
    if !page.insert_slot(slot) {
        page.free_payload(ptr, length);
        return InsertOutcome::PageFull;
    }
    page.set_slot(slot, Slot::new(key.pmnk(), ptr, false));
    encode_pair(&mut page.payload_mut(ptr)[..length], key, value);
    InsertOutcome::Inserted
}

/// Removes a key, freeing its payload and slot. With `must_exist`, an
/// absent key is an error; otherwise it reports `false`.
pub fn remove<K: KeyCodec, V: ValueCodec>(
    page: &mut SlottedPage,
    key: &K,
    must_exist: bool,
    log: LogCtx<'_>,
) -> Result<bool> {
    let slot = match find(page, key) {
        FindOutcome::Found { slot, .. } => slot,
        FindOutcome::NotFound { .. } => {
            return if must_exist {
                Err(Error::KeyNotFound(format!("{key:?}")))
            } else {
                Ok(false)
            };
        }
    };
    let ptr = page.slot(slot).ptr();
    let length = payload_len_in::<K, V>(page.payload(ptr));
    page.free_payload(ptr, length);
    page.delete_slot(slot);

    log.log(LogKind::Remove, Some(key));

    Ok(true)
}

/// Decodes the pair at a slot.
pub fn read_slot<K: KeyCodec, V: ValueCodec>(page: &SlottedPage, slot: u16) -> (K, V) {
    let s = page.slot(slot);
    let (key, value, _) = decode_pair::<K, V>(page.payload(s.ptr()), s.pmnk());
    (key, value)
}

/// Decodes just the key at a slot.
pub fn read_key<K: KeyCodec>(page: &SlottedPage, slot: u16) -> K {
    let s = page.slot(slot);
    K::decode_key(page.payload(s.ptr()), s.pmnk())
}

/// Encoded size of the record at a slot.
pub fn payload_len_at<K: KeyCodec, V: ValueCodec>(page: &SlottedPage, slot: u16) -> usize {
    payload_len_in::<K, V>(page.payload_for_slot(slot))
}

/// Cursor over all pairs of a node in slot order.
pub struct RecordIter<'a, K, V> {
    page: &'a SlottedPage,
    slot: u16,
    _codec: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValueCodec> Iterator for RecordIter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        if self.slot >= self.page.slot_count() {
            return None;
        }
        let pair = read_slot::<K, V>(self.page, self.slot);
        self.slot += 1;
        Some(pair)
    }
}

/// Iterates all pairs of a node in slot order.
pub fn iterate<K: KeyCodec, V: ValueCodec>(page: &SlottedPage) -> RecordIter<'_, K, V> {
    RecordIter {
        page,
        slot: 0,
        _codec: PhantomData,
    }
}

/// Moves `count` records from `src` (starting at `src_slot`) into `dest`
/// (starting at `dest_slot`) as one atomic group: if any allocation in
/// `dest` fails, everything copied so far is rolled back and both pages
/// are left unchanged.
pub fn move_records<K: KeyCodec, V: ValueCodec>(
    dest: &mut SlottedPage,
    dest_slot: u16,
    src: &mut SlottedPage,
    src_slot: u16,
    count: u16,
) -> bool {
    if count == 0 {
        return true;
    }
    let last = src_slot + count - 1;
    debug_assert!(last < src.slot_count());

    let mut i = src_slot;
    let mut j = dest_slot;
    let mut ok = true;
    while i <= last {
        if !dest.insert_slot(j) {
            ok = false;
            break;
        }
        let s = src.slot(i);
        let length = payload_len_in::<K, V>(src.payload(s.ptr()));
        let Some(dptr) = dest.allocate_payload(length) else {
            dest.delete_slot(j);
            ok = false;
            break;
        };
        dest.set_slot(j, Slot::new(s.pmnk(), dptr, s.ghost()));
        dest.payload_mut(dptr)[..length].copy_from_slice(&src.payload(s.ptr())[..length]);
        i += 1;
        j += 1;
    }

    if !ok {
        // Roll back the partial copy so the move is all-or-nothing.
        while j > dest_slot {
            j -= 1;
            let s = dest.slot(j);
            let length = payload_len_in::<K, V>(dest.payload(s.ptr()));
            dest.free_payload(s.ptr(), length);
            dest.delete_slot(j);
        }
        return false;
    }

    while i > src_slot {
        i -= 1;
        let s = src.slot(i);
        let length = payload_len_in::<K, V>(src.payload(s.ptr()));
        src.free_payload(s.ptr(), length);
        src.delete_slot(i);
    }
    true
}

/// Whether slots are in strictly increasing key order with non-decreasing
/// PMNKs. Debugging/testing helper.
pub fn is_sorted<K: KeyCodec>(page: &SlottedPage) -> bool {
    let mut prev: Option<(u16, K)> = None;
    for i in 0..page.slot_count() {
        let pmnk = page.slot(i).pmnk();
        let key = read_key::<K>(page, i);
        if let Some((prev_pmnk, prev_key)) = &prev {
            if pmnk < *prev_pmnk || key <= *prev_key {
                return false;
            }
        }
        prev = Some((pmnk, key));
    }
    true
}
