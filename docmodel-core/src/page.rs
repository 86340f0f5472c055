//! Pagination types for cursor results.
//!
//! This module provides [`PaginationParams`] for selecting a page and
//! [`Page`] for carrying one page of results with navigation metadata.

use serde::{Deserialize, Serialize};

/// A single page of paginated results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use docmodel::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_count(100)
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// assert_eq!(page.count, 100);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total count of items across all pages.
    pub count: u64,
    /// The next page number (if more pages exist).
    pub next_page: Option<u64>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page with custom settings.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
pub struct PageBuilder<T> {
    items: Vec<T>,
    count: u64,
    next_page: Option<u64>,
    previous_page: Option<u64>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    /// Sets the total count of items across all pages.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Sets the next page number (or `None` if this is the last page).
    pub fn with_next_page(mut self, next_page: Option<u64>) -> Self {
        self.next_page = next_page;
        self
    }

    /// Sets the previous page number (or `None` if this is the first page).
    pub fn with_previous_page(mut self, previous_page: Option<u64>) -> Self {
        self.previous_page = previous_page;
        self
    }

    /// Builds and returns the final [`Page`] instance.
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Parameters for paginating through large result sets.
///
/// Pages are 1-indexed; page numbers below 1 are clamped to 1.
///
/// # Example
///
/// ```ignore
/// use docmodel::page::PaginationParams;
///
/// let params = PaginationParams::new(2, 50);
/// assert_eq!(params.offset(), 50);
/// assert_eq!(PaginationParams::new(0, 10), PaginationParams::new(1, 10));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    /// The page number (1-indexed).
    pub page: u64,
    /// Number of items per page.
    pub per_page: u64,
}

impl PaginationParams {
    /// Creates new pagination parameters.
    ///
    /// # Arguments
    ///
    /// * `page` - The page number (1-indexed, clamped up to 1)
    /// * `per_page` - Number of items per page
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page: page.max(1), per_page }
    }

    /// Number of items to skip for this page.
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    /// One past the offset of the last item on this page.
    pub fn end(&self) -> u64 {
        self.page.saturating_mul(self.per_page)
    }

    /// Wraps the items of this page with navigation metadata, given the
    /// total number of items.
    pub fn page<T>(&self, items: Vec<T>, count: u64) -> Page<T> {
        Page::builder(items)
            .with_count(count)
            .with_next_page((self.end() < count).then_some(self.page.saturating_add(1)))
            .with_previous_page((self.page > 1).then(|| self.page - 1))
            .build()
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}
