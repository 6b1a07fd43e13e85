//! The `Paginator` page view and its builder.

use std::convert::Infallible;

use sqlwrap_types::{
    PageRef, PageSlot, PaginationDefaults, DEFAULT_PADDING, DEFAULT_PER_PAGE, DEFAULT_SHOWMAX,
    DEFAULT_START_PAGE,
};

use crate::sanitize::sanitize_page_number;
use crate::source::PageSource;
use crate::window::{clamp_page, compute_pages, compute_window, num_pages};

/// One page view over a [`PageSource`].
///
/// A paginator is built fresh for every page view and never mutated; use
/// [`prev`](Self::prev) and [`next`](Self::next) to get sibling pages.
///
/// With `padding > 0` every page also shows the last `padding` items of
/// the previous page and the first `padding` items of the next one. For
/// example with `per_page = 10` and `padding = 2`, a middle page shows 14
/// items. The borrowed items still appear on their own pages.
#[derive(Debug, Clone)]
pub struct Paginator<S> {
    source: S,
    page: u64,
    per_page: u64,
    total: u64,
    padding: u64,
}

/// Builder for a [`Paginator`].
#[derive(Debug, Clone)]
pub struct PaginatorBuilder<S> {
    source: S,
    page: PageRef,
    per_page: u64,
    total: Option<u64>,
    padding: u64,
}

impl<S: PageSource> PaginatorBuilder<S> {
    /// Starts a builder with the default page, page size, and padding.
    pub fn new(source: S) -> Self {
        Self {
            source,
            page: PageRef::Number(DEFAULT_START_PAGE as i64),
            per_page: DEFAULT_PER_PAGE,
            total: None,
            padding: DEFAULT_PADDING,
        }
    }

    /// Requested page: a number, numeric text, `"first"`, or `"last"`.
    pub fn page(mut self, page: impl Into<PageRef>) -> Self {
        self.page = page.into();
        self
    }

    /// Maximum number of items per page. Must be positive.
    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page;
        self
    }

    /// Total number of items. When unset the source is asked.
    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Items borrowed from each neighbouring page.
    pub fn padding(mut self, padding: u64) -> Self {
        self.padding = padding;
        self
    }

    /// Applies configured page size and padding.
    pub fn defaults(self, defaults: PaginationDefaults) -> Self {
        self.per_page(defaults.per_page).padding(defaults.padding)
    }

    /// Resolves the requested page and builds the paginator.
    ///
    /// # Errors
    ///
    /// Returns the source's error if counting its items fails.
    ///
    /// # Panics
    ///
    /// Panics if `per_page` is zero.
    pub fn build(self) -> Result<Paginator<S>, S::Error> {
        assert!(self.per_page > 0, "`per_page` must be a positive integer");

        let total = match self.total {
            Some(total) => total,
            None => self.source.total()?,
        };
        let pages = num_pages(total, self.per_page);

        let requested = match self.page {
            PageRef::First => DEFAULT_START_PAGE,
            PageRef::Last => sanitize_page_number(pages, DEFAULT_START_PAGE),
            other => sanitize_page_number(other, DEFAULT_START_PAGE),
        };
        let page = clamp_page(requested, pages);
        if page != requested {
            tracing::debug!(requested, page, num_pages = pages, "page out of range, clamped");
        }

        Ok(Paginator {
            source: self.source,
            page,
            per_page: self.per_page,
            total,
            padding: self.padding,
        })
    }
}

impl<S: PageSource> Paginator<S> {
    /// Builds a paginator for `page` with `per_page` items per page.
    ///
    /// # Errors
    ///
    /// Returns the source's error if counting its items fails.
    pub fn new(source: S, page: impl Into<PageRef>, per_page: u64) -> Result<Self, S::Error> {
        PaginatorBuilder::new(source)
            .page(page)
            .per_page(per_page)
            .build()
    }

    /// Starts a [`PaginatorBuilder`] over `source`.
    pub fn builder(source: S) -> PaginatorBuilder<S> {
        PaginatorBuilder::new(source)
    }

    /// Fetches the items of the current page, padding included.
    ///
    /// # Errors
    ///
    /// Returns the source's error if fetching fails.
    pub fn items(&self) -> Result<Vec<S::Item>, S::Error> {
        self.source.slice(self.offset(), self.limit())
    }

    /// Returns the paginator for the previous page, if there is one.
    pub fn prev(&self) -> Option<Self>
    where
        S: Clone,
    {
        self.has_prev().then(|| self.sibling(self.page - 1))
    }

    /// Returns the paginator for the next page, if there is one.
    pub fn next(&self) -> Option<Self>
    where
        S: Clone,
    {
        self.has_next().then(|| self.sibling(self.page + 1))
    }

    fn sibling(&self, page: u64) -> Self
    where
        S: Clone,
    {
        Self {
            source: self.source.clone(),
            page,
            per_page: self.per_page,
            total: self.total,
            padding: self.padding,
        }
    }
}

impl<S> Paginator<S> {
    /// The underlying data source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current page number, 1-indexed.
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Maximum number of items per page, padding excluded.
    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    /// Total number of items.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Items borrowed from each neighbouring page.
    pub fn padding(&self) -> u64 {
        self.padding
    }

    /// `true` when there are no items at all.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Total number of pages.
    pub fn num_pages(&self) -> u64 {
        num_pages(self.total, self.per_page)
    }

    /// Alias of [`num_pages`](Self::num_pages).
    pub fn total_pages(&self) -> u64 {
        self.num_pages()
    }

    /// `true` if more than one page exists.
    pub fn is_paginated(&self) -> bool {
        self.num_pages() > 1
    }

    /// `true` if a previous page exists.
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    /// `true` if a next page exists.
    pub fn has_next(&self) -> bool {
        self.page < self.num_pages()
    }

    /// Number of the previous page.
    pub fn prev_num(&self) -> u64 {
        self.page - 1
    }

    /// Number of the next page.
    pub fn next_num(&self) -> u64 {
        self.page + 1
    }

    /// Number of items on the current page, padding included.
    ///
    /// Less than `per_page` on a short last page, more when `padding > 0`.
    pub fn showing(&self) -> u64 {
        let mut so_far = (self.per_page * self.page + self.padding).min(self.total);
        if self.page > 1 {
            so_far += self.padding;
        }
        so_far.saturating_sub(self.per_page * (self.page - 1))
    }

    /// 0-based index of the first item of the page, padding excluded.
    pub fn start_index(&self) -> u64 {
        (self.page - 1) * self.per_page
    }

    /// 0-based index of the last item of the page, padding excluded.
    pub fn end_index(&self) -> u64 {
        let end = self.start_index() + self.per_page - 1;
        end.min(self.total.saturating_sub(1))
    }

    /// Offset of the first item fetched, padding included.
    pub fn offset(&self) -> u64 {
        compute_window(self.page, self.per_page, self.padding, self.total).0
    }

    /// Number of items fetched, padding included.
    pub fn limit(&self) -> u64 {
        compute_window(self.page, self.per_page, self.padding, self.total).1
    }

    /// 1-based range of the items on the page, for "Showing 41 - 50 of 194".
    ///
    /// An empty paginator returns `0{sep}0`.
    pub fn get_range(&self, sep: &str) -> String {
        if self.is_empty() {
            return format!("0{sep}0");
        }
        format!("{}{sep}{}", self.start_index() + 1, self.end_index() + 1)
    }

    /// Page window with the default `showmax` of 12.
    pub fn pages(&self) -> Vec<PageSlot> {
        self.get_pages(DEFAULT_SHOWMAX)
    }

    /// Page window showing about `showmax` page numbers.
    ///
    /// See [`compute_pages`] for the rules.
    ///
    /// # Panics
    ///
    /// Panics if `showmax` is less than 4.
    pub fn get_pages(&self, showmax: usize) -> Vec<PageSlot> {
        compute_pages(self.page, self.num_pages(), showmax)
    }
}

impl<S> IntoIterator for Paginator<S>
where
    S: PageSource<Error = Infallible>,
{
    type Item = S::Item;
    type IntoIter = std::vec::IntoIter<S::Item>;

    fn into_iter(self) -> Self::IntoIter {
        match self.items() {
            Ok(items) => items.into_iter(),
            Err(never) => match never {},
        }
    }
}
