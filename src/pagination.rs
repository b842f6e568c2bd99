//! This module defines the common functionality for paging data.

use serde::Serialize;

/// The config that controls how pages of data are served.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// The page number to default to when not specified in a request.
    pub default_page: u64,
    /// The number of rows per page when not specified in a request.
    pub default_page_size: u64,
    /// The largest page size a request may ask for.
    pub max_page_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page: 1,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl PaginationConfig {
    /// Resolve the requested page and page size to `(page, limit, offset)`.
    ///
    /// Zero or missing values fall back to the defaults, and the page size
    /// is clamped to `max_page_size`.
    pub fn resolve(&self, page: Option<u64>, limit: Option<u64>) -> (u64, u64, u64) {
        let page = match page {
            Some(page) if page > 0 => page,
            _ => self.default_page,
        };
        let limit = match limit {
            Some(limit) if limit > 0 => limit.min(self.max_page_size),
            _ => self.default_page_size,
        };

        (page, limit, (page - 1) * limit)
    }
}

/// The pagination block returned alongside a page of rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// The total number of rows matching the query.
    pub total: u64,
    /// The 1-based page number served.
    pub page: u64,
    /// The page size served.
    pub limit: u64,
    /// The number of pages at this page size.
    pub total_pages: u64,
}

impl Pagination {
    /// Build the pagination block for `total` rows.
    pub fn new(total: u64, page: u64, limit: u64) -> Self {
        Self {
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit.max(1)),
        }
    }
}
