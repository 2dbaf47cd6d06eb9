//! Page arithmetic for listing endpoints

/// Rows per page when the caller does not ask for a size
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: i64 = 500;

/// Sanitized page position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET
    pub offset: i64,
}

/// Clamp the requested page into `[1, total_pages]` and the size into
/// `[1, MAX_PAGE_SIZE]`
///
/// ```
/// use ua_at::pagination::calculate_pagination;
///
/// let p = calculate_pagination(250, Some(2), Some(100));
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 100);
///
/// let p = calculate_pagination(250, Some(99), Some(100));
/// assert_eq!(p.page, 3);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: Option<i64>, requested_size: Option<i64>) -> Pagination {
    let page_size = requested_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let total_pages = (total_results.max(0) + page_size - 1) / page_size;
    let page = requested_page.unwrap_or(1).max(1).min(total_pages.max(1));

    Pagination {
        page,
        page_size,
        total_pages,
        offset: (page - 1) * page_size,
    }
}
