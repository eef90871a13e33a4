//! Index pagination and entry adjacency.
//!
//! The first index page is one entry longer than the rest. Page 1 lives at
//! `/`, page `k` at `/entries?page=k`.

use serde::Serialize;
use std::ops::Range;

pub const FIRST_PAGE_SIZE: usize = 11;
pub const PAGE_SIZE: usize = 10;

/// Number of index pages for `total` entries; never zero.
pub const fn page_count(total: usize) -> usize {
    if total <= FIRST_PAGE_SIZE {
        1
    } else {
        (total - FIRST_PAGE_SIZE).div_ceil(PAGE_SIZE) + 1
    }
}

/// Entry range shown on 1-based `page`.
fn page_range(page: usize, total: usize) -> Range<usize> {
    let (start, len) = if page <= 1 {
        (0, FIRST_PAGE_SIZE)
    } else {
        (FIRST_PAGE_SIZE + (page - 2) * PAGE_SIZE, PAGE_SIZE)
    };
    let start = start.min(total);
    start..(start + len).min(total)
}

pub fn page_url(page: usize) -> String {
    if page <= 1 {
        "/".to_string()
    } else {
        format!("/entries?page={page}")
    }
}

/// Output file for 1-based `page`.
pub fn page_file(page: usize) -> String {
    if page <= 1 {
        "index.html".to_string()
    } else {
        format!("index_{page}.html")
    }
}

/// Navigation data exposed to the index template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub total_pages: usize,
    pub url: String,
    pub previous_url: Option<String>,
    pub next_url: Option<String>,
}

#[derive(Debug)]
pub struct IndexPage<'a, T> {
    pub items: &'a [T],
    pub pagination: Pagination,
}

/// Split `items` into index pages. Always yields at least one page.
pub fn paginate<T>(items: &[T]) -> Vec<IndexPage<'_, T>> {
    let total_pages = page_count(items.len());
    (1..=total_pages)
        .map(|page| IndexPage {
            items: &items[page_range(page, items.len())],
            pagination: Pagination {
                page,
                total_pages,
                url: page_url(page),
                previous_url: (page > 1).then(|| page_url(page - 1)),
                next_url: (page < total_pages).then(|| page_url(page + 1)),
            },
        })
        .collect()
}

/// Previous and next entries around position `index` in the full sequence.
pub fn adjacency<T>(items: &[T], index: usize) -> (Option<&T>, Option<&T>) {
    let previous = index.checked_sub(1).and_then(|i| items.get(i));
    let next = items.get(index + 1);
    (previous, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(n: usize) -> Vec<usize> {
        let items: Vec<usize> = (0..n).collect();
        paginate(&items).iter().map(|p| p.items.len()).collect()
    }

    #[test]
    fn test_page_counts() {
        assert_eq!(sizes(0), vec![0]);
        assert_eq!(sizes(11), vec![11]);
        assert_eq!(sizes(12), vec![11, 1]);
        assert_eq!(sizes(30), vec![11, 10, 9]);
        assert_eq!(sizes(31), vec![11, 10, 10]);
        assert_eq!(page_count(32), 4);
    }

    #[test]
    fn test_pages_partition_sequence() {
        let items: Vec<usize> = (0..47).collect();
        let joined: Vec<usize> = paginate(&items)
            .iter()
            .flat_map(|p| p.items.iter().copied())
            .collect();
        assert_eq!(joined, items);
    }

    #[test]
    fn test_page_urls() {
        let items: Vec<usize> = (0..30).collect();
        let pages = paginate(&items);

        let first = &pages[0].pagination;
        assert_eq!(first.url, "/");
        assert_eq!(first.previous_url, None);
        assert_eq!(first.next_url.as_deref(), Some("/entries?page=2"));

        let second = &pages[1].pagination;
        assert_eq!(second.previous_url.as_deref(), Some("/"));
        assert_eq!(second.next_url.as_deref(), Some("/entries?page=3"));

        let last = &pages[2].pagination;
        assert_eq!(last.previous_url.as_deref(), Some("/entries?page=2"));
        assert_eq!(last.next_url, None);
        assert_eq!(last.total_pages, 3);
    }

    #[test]
    fn test_page_files() {
        assert_eq!(page_file(1), "index.html");
        assert_eq!(page_file(3), "index_3.html");
    }

    #[test]
    fn test_adjacency() {
        let seq = ["A", "B", "C"];
        assert_eq!(adjacency(&seq, 1), (Some(&"A"), Some(&"C")));
        assert_eq!(adjacency(&seq, 0), (None, Some(&"B")));
        assert_eq!(adjacency(&seq, 2), (Some(&"B"), None));
    }

    #[test]
    fn test_adjacency_crosses_page_boundary() {
        let items: Vec<usize> = (0..12).collect();
        // entry 10 ends page 1, entry 11 starts page 2
        assert_eq!(adjacency(&items, 10), (Some(&9), Some(&11)));
        assert_eq!(adjacency(&items, 11), (Some(&10), None));
    }
}
