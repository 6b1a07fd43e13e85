//! Cleanup of untrusted page arguments.

use sqlwrap_types::PageRef;

/// Turns a page argument into a positive page number.
///
/// Integers and numeric strings are accepted when positive. Anything else
/// (non-numeric text, zero, negative numbers, a missing value) returns
/// `default`. The `"first"` and `"last"` sentinels are not resolved here;
/// [`Paginator`](crate::Paginator) handles them before sanitizing, so on
/// their own they also fall back to `default`.
///
/// ```
/// use sqlwrap_paginator::sanitize_page_number;
///
/// assert_eq!(sanitize_page_number("5", 1), 5);
/// assert_eq!(sanitize_page_number("0", 1), 1);
/// assert_eq!(sanitize_page_number(-3, 1), 1);
/// assert_eq!(sanitize_page_number(None::<&str>, 1), 1);
/// ```
pub fn sanitize_page_number(value: impl Into<PageRef>, default: u64) -> u64 {
    let number = match value.into() {
        PageRef::Number(n) => n,
        PageRef::Text(text) => match text.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => return default,
        },
        PageRef::First | PageRef::Last | PageRef::Missing => return default,
    };

    if number > 0 {
        number as u64
    } else {
        default
    }
}
