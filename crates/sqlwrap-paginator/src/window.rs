//! Page-window generation and offset/limit arithmetic.
//!
//! A page window is the short list of page numbers a pager shows. The first,
//! last, and current pages are always present. The remaining slots are
//! filled around the current page, after the first page, and before the
//! last page, in turns. Skipped runs become a single [`PageSlot::Gap`], and
//! a gap never hides exactly one page.

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};

use sqlwrap_types::{PageSlot, MIN_SHOWMAX};

/// Returns the number of pages needed to show `total` items.
///
/// # Panics
///
/// Panics if `per_page` is zero.
pub fn num_pages(total: u64, per_page: u64) -> u64 {
    assert!(per_page > 0, "`per_page` must be a positive integer");
    total.div_ceil(per_page)
}

/// Clamps a page number into `[1, max(num_pages, 1)]`.
pub(crate) fn clamp_page(page: u64, num_pages: u64) -> u64 {
    page.clamp(1, num_pages.max(1))
}

/// Returns `(offset, limit)` for `page`, including `padding` items borrowed
/// from each neighbouring page.
///
/// The first page has no previous page, so it borrows only from the next
/// one. `page` is clamped into range first.
///
/// # Panics
///
/// Panics if `per_page` is zero.
pub fn compute_window(page: u64, per_page: u64, padding: u64, total: u64) -> (u64, u64) {
    let page = clamp_page(page, num_pages(total, per_page));
    let offset = ((page - 1) * per_page).saturating_sub(padding);
    let limit = if page > 1 {
        per_page + 2 * padding
    } else {
        per_page + padding
    };
    (offset, limit)
}

/// Builds the page window for `current_page` out of `total_pages`.
///
/// Returns every page when `total_pages <= showmax`. Otherwise at most
/// `showmax` numbers are returned with [`PageSlot::Gap`] between
/// non-contiguous runs. A gap never hides a single page, so when the first,
/// last, and current pages cannot be separated otherwise (page 3 of 5 with
/// `showmax` 4) one extra number is shown.
///
/// ```
/// use sqlwrap_paginator::{compute_pages, PageSlot::{Gap, Page}};
///
/// assert_eq!(
///     compute_pages(10, 20, 4),
///     vec![Page(1), Gap, Page(9), Page(10), Gap, Page(20)],
/// );
/// ```
///
/// # Panics
///
/// Panics if `showmax` is less than 4.
pub fn compute_pages(current_page: u64, total_pages: u64, showmax: usize) -> Vec<PageSlot> {
    assert!(
        showmax >= MIN_SHOWMAX,
        "`showmax` must be at least {MIN_SHOWMAX}"
    );

    if total_pages <= showmax as u64 {
        return (1..=total_pages).map(PageSlot::Page).collect();
    }

    let page = current_page.clamp(1, total_pages);
    let window = PageGroups::grow(page, total_pages, showmax).merge();
    fit_to_showmax(window, page, total_pages, showmax)
}

/// The three runs of a page window before merging.
struct PageGroups {
    left: Vec<u64>,
    center: VecDeque<u64>,
    right: VecDeque<u64>,
}

impl PageGroups {
    fn grow(page: u64, total_pages: u64, showmax: usize) -> Self {
        let mut groups = Self {
            left: vec![1],
            center: VecDeque::from([page]),
            right: VecDeque::from([total_pages]),
        };

        loop {
            if groups.is_full(showmax) {
                break;
            }
            let front = groups.center[0];
            if front > 1 {
                groups.center.push_front(front - 1);
            }

            if groups.is_full(showmax) {
                break;
            }
            let back = groups.center[groups.center.len() - 1];
            if back < total_pages {
                groups.center.push_back(back + 1);
            }

            if groups.is_full(showmax) {
                break;
            }
            let next = groups.left[groups.left.len() - 1] + 1;
            groups.left.push(next);

            if groups.is_full(showmax) {
                break;
            }
            let front = groups.right[0];
            if front > 1 {
                groups.right.push_front(front - 1);
            }
        }

        groups
    }

    fn is_full(&self, showmax: usize) -> bool {
        let distinct: BTreeSet<u64> = self
            .left
            .iter()
            .chain(self.center.iter())
            .chain(self.right.iter())
            .copied()
            .collect();
        distinct.len() >= showmax
    }

    fn merge(self) -> Vec<PageSlot> {
        let Self {
            left,
            center,
            mut right,
        } = self;

        let mut pages: Vec<PageSlot> = left.iter().copied().map(PageSlot::Page).collect();

        // left | center
        let first = center[0];
        if last_page(&pages) + 2 == first {
            if pages.len() > 1 {
                pages.pop();
            } else {
                pages.push(PageSlot::Page(first - 1));
            }
        }
        if last_page(&pages) + 1 < first {
            pages.push(PageSlot::Gap);
        }
        pages.extend(center.iter().copied().map(PageSlot::Page));

        // center | right
        let first = right[0];
        if last_page(&pages) + 2 == first {
            if right.len() > 1 {
                right.pop_front();
            } else {
                pages.push(PageSlot::Page(first - 1));
            }
        }
        if last_page(&pages) + 1 < right[0] {
            pages.push(PageSlot::Gap);
        }
        pages.extend(right.iter().copied().map(PageSlot::Page));

        dedup_pages(pages)
    }
}

/// Drops pages, farthest from `page` first, while the window holds more than
/// `showmax` numbers. The first, last, and current pages stay, and a page is
/// only dropped (alone or with its successor) if no gap ends up hiding
/// exactly one page.
fn fit_to_showmax(
    window: Vec<PageSlot>,
    page: u64,
    total_pages: u64,
    showmax: usize,
) -> Vec<PageSlot> {
    let mut numbers: Vec<u64> = window.iter().filter_map(|slot| slot.page()).collect();
    if numbers.len() <= showmax {
        return window;
    }

    while numbers.len() > showmax {
        let mut candidates: Vec<u64> = numbers
            .iter()
            .copied()
            .filter(|&n| n != 1 && n != total_pages && n != page)
            .collect();
        candidates.sort_by_key(|&n| (Reverse(n.abs_diff(page)), n));

        let singles = candidates.iter().map(|&n| vec![n]);
        let pairs = candidates
            .iter()
            .filter(|&&n| candidates.contains(&(n + 1)))
            .map(|&n| vec![n, n + 1]);
        let trimmed = singles
            .chain(pairs)
            .map(|dropped| {
                numbers
                    .iter()
                    .copied()
                    .filter(|n| !dropped.contains(n))
                    .collect::<Vec<u64>>()
            })
            .find(|kept| kept.windows(2).all(|pair| pair[1] - pair[0] != 2));

        match trimmed {
            Some(kept) => numbers = kept,
            None => break,
        }
    }

    let mut slots = Vec::with_capacity(numbers.len() * 2);
    for (i, &n) in numbers.iter().enumerate() {
        if i > 0 && n > numbers[i - 1] + 1 {
            slots.push(PageSlot::Gap);
        }
        slots.push(PageSlot::Page(n));
    }
    slots
}

/// Last page number pushed so far. Runs always end with a page, never a gap.
fn last_page(pages: &[PageSlot]) -> u64 {
    pages.iter().rev().find_map(|slot| slot.page()).unwrap_or(0)
}

/// Removes repeated page numbers, keeping the first occurrence and every gap.
fn dedup_pages(pages: Vec<PageSlot>) -> Vec<PageSlot> {
    let mut seen = BTreeSet::new();
    pages
        .into_iter()
        .filter(|slot| match slot {
            PageSlot::Page(n) => seen.insert(*n),
            PageSlot::Gap => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(layout: &[Option<u64>]) -> Vec<PageSlot> {
        layout
            .iter()
            .map(|slot| slot.map_or(PageSlot::Gap, PageSlot::Page))
            .collect()
    }

    #[test]
    fn short_runs_are_listed_in_full() {
        assert_eq!(compute_pages(3, 5, 12), window(&[Some(1), Some(2), Some(3), Some(4), Some(5)]));
        assert_eq!(compute_pages(1, 1, 4), window(&[Some(1)]));
        assert!(compute_pages(1, 0, 4).is_empty());
    }

    #[test]
    fn fifteen_pages_with_showmax_twelve() {
        let n = None;
        let cases: [(u64, Vec<Option<u64>>); 15] = [
            (1, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), n, Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (2, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7), n, Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (3, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7), n, Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (4, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7), Some(8), n, Some(12), Some(13), Some(14), Some(15)]),
            (5, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7), Some(8), n, Some(12), Some(13), Some(14), Some(15)]),
            (6, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7), Some(8), Some(9), n, Some(13), Some(14), Some(15)]),
            (7, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7), Some(8), Some(9), n, Some(13), Some(14), Some(15)]),
            (8, vec![Some(1), Some(2), n, Some(5), Some(6), Some(7), Some(8), Some(9), Some(10), n, Some(13), Some(14), Some(15)]),
            (9, vec![Some(1), Some(2), Some(3), n, Some(6), Some(7), Some(8), Some(9), Some(10), Some(11), n, Some(14), Some(15)]),
            (10, vec![Some(1), Some(2), Some(3), n, Some(7), Some(8), Some(9), Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (11, vec![Some(1), Some(2), Some(3), Some(4), n, Some(8), Some(9), Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (12, vec![Some(1), Some(2), Some(3), Some(4), n, Some(8), Some(9), Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (13, vec![Some(1), Some(2), Some(3), Some(4), Some(5), n, Some(9), Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (14, vec![Some(1), Some(2), Some(3), Some(4), Some(5), n, Some(9), Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
            (15, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), n, Some(10), Some(11), Some(12), Some(13), Some(14), Some(15)]),
        ];

        for (page, expected) in cases {
            assert_eq!(compute_pages(page, 15, 12), window(&expected), "page {page}");
        }
    }

    #[test]
    fn smallest_showmax() {
        let n = None;
        assert_eq!(compute_pages(1, 20, 4), window(&[Some(1), Some(2), n, Some(19), Some(20)]));
        assert_eq!(compute_pages(10, 20, 4), window(&[Some(1), n, Some(9), Some(10), n, Some(20)]));
        assert_eq!(compute_pages(20, 20, 4), window(&[Some(1), Some(2), n, Some(19), Some(20)]));
        assert_eq!(compute_pages(3, 20, 4), window(&[Some(1), Some(2), Some(3), n, Some(20)]));
    }

    #[test]
    fn single_hidden_page_is_shown_only_when_unavoidable() {
        let n = None;
        assert_eq!(
            compute_pages(3, 5, 4),
            window(&[Some(1), Some(2), Some(3), Some(4), Some(5)])
        );
        assert_eq!(compute_pages(4, 5, 4), window(&[Some(1), n, Some(4), Some(5)]));
        assert_eq!(
            compute_pages(4, 6, 4),
            window(&[Some(1), n, Some(4), Some(5), Some(6)])
        );
        assert_eq!(
            compute_pages(9, 11, 4),
            window(&[Some(1), n, Some(9), Some(10), Some(11)])
        );
    }

    #[test]
    fn window_stays_within_showmax_when_possible() {
        for showmax in 4..=8 {
            for total_pages in (showmax as u64 + 1)..=30 {
                for page in 1..=total_pages {
                    let numbers = compute_pages(page, total_pages, showmax)
                        .iter()
                        .filter(|slot| !slot.is_gap())
                        .count();
                    if numbers > showmax {
                        assert_eq!((page, total_pages, showmax), (3, 5, 4));
                        assert_eq!(numbers, showmax + 1);
                    }
                }
            }
        }
    }

    #[test]
    fn out_of_range_page_is_clamped() {
        assert_eq!(compute_pages(99, 20, 4), compute_pages(20, 20, 4));
        assert_eq!(compute_pages(0, 20, 4), compute_pages(1, 20, 4));
    }

    #[test]
    #[should_panic(expected = "`showmax` must be at least 4")]
    fn showmax_below_four_panics() {
        compute_pages(1, 20, 3);
    }

    #[test]
    fn window_with_padding() {
        assert_eq!(compute_window(1, 10, 2, 100), (0, 12));
        assert_eq!(compute_window(2, 10, 2, 100), (8, 14));
        assert_eq!(compute_window(5, 10, 0, 194), (40, 10));
    }

    #[test]
    fn window_clamps_page() {
        assert_eq!(compute_window(50, 10, 0, 25), (20, 10));
        assert_eq!(compute_window(3, 10, 0, 0), (0, 10));
    }

    #[test]
    #[should_panic(expected = "`per_page` must be a positive integer")]
    fn zero_per_page_panics() {
        num_pages(200, 0);
    }

    #[test]
    fn page_count() {
        assert_eq!(num_pages(0, 10), 0);
        assert_eq!(num_pages(194, 10), 20);
        assert_eq!(num_pages(490, 20), 25);
        assert_eq!(num_pages(148, 10), 15);
    }
}
