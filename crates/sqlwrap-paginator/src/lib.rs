//! Pagination for sqlwrap.
//!
//! A [`Paginator`] represents one page view over anything that implements
//! [`PageSource`]: slices, vectors, integer ranges, or a database query
//! (see `sqlwrap_db::QuerySource`). The arithmetic is exposed as free
//! functions so handlers and templates can use it without a source:
//!
//! - [`compute_pages`] builds the compact page window rendered by a pager,
//!   collapsing long runs of pages into a single gap.
//! - [`sanitize_page_number`] turns untrusted input into a usable page.
//! - [`compute_window`] returns the `(offset, limit)` pair for a page.
//!
//! # Example
//!
//! ```
//! use sqlwrap_paginator::Paginator;
//!
//! let items: Vec<u32> = (0..194).collect();
//! let page = Paginator::new(items, 5, 10).unwrap();
//! assert_eq!(page.get_range(" - "), "41 - 50");
//! assert_eq!(page.items().unwrap(), (40..50).collect::<Vec<_>>());
//! ```

mod paginator;
mod sanitize;
mod source;
mod window;

pub use paginator::{Paginator, PaginatorBuilder};
pub use sanitize::sanitize_page_number;
pub use source::PageSource;
pub use window::{compute_pages, compute_window, num_pages};

pub use sqlwrap_types::{PageRef, PageSlot};
