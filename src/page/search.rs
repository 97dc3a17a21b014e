//! Binary search over the slot vector, keyed on PMNK.
//!
//! Lower-bound discipline: the returned position is the first slot whose
//! PMNK is greater than or equal to the probe, so a run of equal PMNKs is
//! always entered at its first element. Equality on the PMNK is
//! inconclusive for full keys; the caller decodes full keys and walks
//! forward while the PMNK still matches.

use crate::config::Pmnk;

use super::slotted::SlottedPage;

/// Searches `page` slots `[lo, hi)` for `pmnk`.
///
/// Returns `(pos, exact)`: `pos` is the insertion point (first slot with
/// PMNK >= `pmnk`, or `hi` if none), `exact` whether the slot at `pos`
/// carries exactly that PMNK. `(slot_count, false)` when the probe is past
/// every slot.
pub fn binary_search(page: &SlottedPage, pmnk: Pmnk, mut lo: u16, mut hi: u16) -> (u16, bool) {
    debug_assert!(hi <= page.slot_count());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if page.slot(mid).pmnk() < pmnk {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let exact = lo < page.slot_count() && page.slot(lo).pmnk() == pmnk;
    (lo, exact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::slotted::Slot;

    fn page_with_pmnks(pmnks: &[u16]) -> Box<SlottedPage> {
        let mut page = SlottedPage::new_boxed(0);
        for (i, p) in pmnks.iter().enumerate() {
            assert!(page.insert_slot(i as u16));
            page.set_slot(i as u16, Slot::new(*p, 0, false));
        }
        page
    }

    #[test]
    fn finds_exact_pmnk() {
        let page = page_with_pmnks(&[10, 20, 30, 40]);
        assert_eq!(binary_search(&page, 20, 0, 4), (1, true));
        assert_eq!(binary_search(&page, 10, 0, 4), (0, true));
        assert_eq!(binary_search(&page, 40, 0, 4), (3, true));
    }

    #[test]
    fn returns_insertion_point_for_missing_pmnk() {
        let page = page_with_pmnks(&[10, 20, 30, 40]);
        assert_eq!(binary_search(&page, 5, 0, 4), (0, false));
        assert_eq!(binary_search(&page, 25, 0, 4), (2, false));
        assert_eq!(binary_search(&page, 45, 0, 4), (4, false));
    }

    #[test]
    fn equal_run_is_entered_at_its_first_slot() {
        let page = page_with_pmnks(&[10, 20, 20, 20, 30]);
        assert_eq!(binary_search(&page, 20, 0, 5), (1, true));
    }

    #[test]
    fn empty_range_reports_not_found() {
        let page = page_with_pmnks(&[]);
        assert_eq!(binary_search(&page, 7, 0, 0), (0, false));
    }
}
