//! Pagination defaults shared by configuration and callers.

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_PADDING, DEFAULT_PER_PAGE, DEFAULT_SHOWMAX};

/// Default pagination settings, usually loaded from a config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationDefaults {
    /// Items per page.
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    /// Items borrowed from each neighbouring page.
    #[serde(default)]
    pub padding: u64,
    /// Maximum page numbers in a rendered window.
    #[serde(default = "default_showmax")]
    pub showmax: usize,
}

fn default_per_page() -> u64 {
    DEFAULT_PER_PAGE
}

fn default_showmax() -> usize {
    DEFAULT_SHOWMAX
}

impl Default for PaginationDefaults {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            padding: DEFAULT_PADDING,
            showmax: DEFAULT_SHOWMAX,
        }
    }
}
