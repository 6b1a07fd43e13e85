//! Shared types and constants for the sqlwrap workspace.
//!
//! This crate holds the plain value types that cross crate boundaries:
//! page references accepted by the paginator, the slots of a rendered page
//! window, column types used by model declarations, and the table strategy
//! chosen for a registered model.
//!
//! Nothing here touches the database. Both `sqlwrap-paginator` and
//! `sqlwrap-db` depend on this crate and on nothing else in the workspace
//! for shared definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

mod pagination;
pub use pagination::PaginationDefaults;

/// First page number. Pages are 1-indexed.
pub const DEFAULT_START_PAGE: u64 = 1;

/// Items per page when the caller does not choose.
pub const DEFAULT_PER_PAGE: u64 = 20;

/// Items borrowed from each neighbouring page when the caller does not choose.
pub const DEFAULT_PADDING: u64 = 0;

/// Maximum number of page numbers shown in a page window by default.
pub const DEFAULT_SHOWMAX: usize = 12;

/// Smallest accepted `showmax` for a page window.
pub const MIN_SHOWMAX: usize = 4;

/// A requested page, as it arrives from a query string or a caller.
///
/// The paginator resolves `First` and `Last` itself; everything else goes
/// through page-number sanitation and may fall back to a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRef {
    /// An explicit page number, possibly out of range or non-positive.
    Number(i64),
    /// Raw text such as `"5"` or `"abc"`.
    Text(String),
    /// The `"first"` sentinel.
    First,
    /// The `"last"` sentinel.
    Last,
    /// No page was given.
    Missing,
}

impl Default for PageRef {
    fn default() -> Self {
        Self::Number(DEFAULT_START_PAGE as i64)
    }
}

impl From<i64> for PageRef {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for PageRef {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<u32> for PageRef {
    fn from(value: u32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<u64> for PageRef {
    fn from(value: u64) -> Self {
        Self::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for PageRef {
    fn from(value: usize) -> Self {
        Self::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for PageRef {
    fn from(value: &str) -> Self {
        match value {
            "first" => Self::First,
            "last" => Self::Last,
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<String> for PageRef {
    fn from(value: String) -> Self {
        match value.as_str() {
            "first" => Self::First,
            "last" => Self::Last,
            _ => Self::Text(value),
        }
    }
}

impl<T: Into<PageRef>> From<Option<T>> for PageRef {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

/// One entry of a rendered page window.
///
/// Serializes as a bare number for pages and `null` for gaps, which is what
/// templates expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageSlot {
    /// A page number to render as a link.
    Page(u64),
    /// A collapsed run of skipped pages, rendered as an ellipsis.
    Gap,
}

impl PageSlot {
    /// Returns the page number, or `None` for a gap.
    pub fn page(self) -> Option<u64> {
        match self {
            Self::Page(n) => Some(n),
            Self::Gap => None,
        }
    }

    /// Returns `true` if this slot is a gap marker.
    pub fn is_gap(self) -> bool {
        matches!(self, Self::Gap)
    }
}

impl fmt::Display for PageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(n) => write!(f, "{n}"),
            Self::Gap => f.write_str("…"),
        }
    }
}

/// Storage type of a declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// Double precision float.
    Real,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
    /// Stored as 0/1.
    Boolean,
    /// ISO 8601 text.
    Timestamp,
}

impl ColumnType {
    /// Returns the SQL type name used in DDL.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

/// How a registered model maps onto tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStrategy {
    /// The model owns its table.
    Own {
        /// Table name.
        table: String,
    },
    /// The model has its own table whose primary key references the
    /// parent model's table (joined-table inheritance).
    Joined {
        /// The model's own table.
        table: String,
        /// The nearest ancestor table it joins to.
        parent_table: String,
    },
    /// The model stores its rows in an ancestor's table
    /// (single-table inheritance).
    SingleTable {
        /// The shared ancestor table.
        table: String,
    },
    /// Abstract models have no table.
    Abstract,
}

impl TableStrategy {
    /// Returns the table that holds this model's own columns, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Own { table } | Self::Joined { table, .. } | Self::SingleTable { table } => {
                Some(table)
            }
            Self::Abstract => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ref_from_sentinels() {
        assert_eq!(PageRef::from("first"), PageRef::First);
        assert_eq!(PageRef::from("last".to_string()), PageRef::Last);
        assert_eq!(PageRef::from("5"), PageRef::Text("5".to_string()));
        assert_eq!(PageRef::from(None::<&str>), PageRef::Missing);
        assert_eq!(PageRef::from(Some(3_i64)), PageRef::Number(3));
        assert_eq!(PageRef::from(u64::MAX), PageRef::Number(i64::MAX));
    }

    #[test]
    fn page_slot_serializes_gaps_as_null() {
        let slots = vec![PageSlot::Page(1), PageSlot::Gap, PageSlot::Page(9)];
        let json = serde_json::to_string(&slots).expect("should serialize");
        assert_eq!(json, "[1,null,9]");
    }

    #[test]
    fn page_slot_display() {
        assert_eq!(PageSlot::Page(4).to_string(), "4");
        assert_eq!(PageSlot::Gap.to_string(), "…");
        assert_eq!(PageSlot::Gap.page(), None);
        assert!(PageSlot::Gap.is_gap());
    }

    #[test]
    fn table_strategy_table() {
        let joined = TableStrategy::Joined {
            table: "engineers".to_string(),
            parent_table: "people".to_string(),
        };
        assert_eq!(joined.table(), Some("engineers"));
        assert_eq!(TableStrategy::Abstract.table(), None);
    }
}
