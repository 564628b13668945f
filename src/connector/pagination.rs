//! Continuation-token listing
//!
//! Exhausts a cursor protocol into one ordered listing. Pages are
//! concatenated in the order the backend returns them; a hard page
//! ceiling rejects continuation chains that never terminate.

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::error::AdapterError;

/// Default ceiling on pages followed by a single listing
pub const DEFAULT_MAX_PAGES: usize = 100;

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub entries: Vec<T>,
    /// Cursor for the next page; None when the listing is complete
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from a "has more" flag plus cursor
    pub fn new(entries: Vec<T>, has_more: bool, cursor: Option<String>) -> Self {
        Self {
            entries,
            next: if has_more { cursor } else { None },
        }
    }

    pub fn last(entries: Vec<T>) -> Self {
        Self { entries, next: None }
    }
}

/// A listing protocol with an initial call and a continuation call
#[async_trait]
pub trait PageSource: Send + Sync {
    type Entry: Send;
    type Error: From<AdapterError> + Send;

    async fn first_page(&self, path: &str) -> Result<Page<Self::Entry>, Self::Error>;

    async fn next_page(&self, cursor: &str) -> Result<Page<Self::Entry>, Self::Error>;
}

/// Follow continuation cursors until the listing is complete
///
/// Issues one call per page. Fails with an I/O error once `max_pages`
/// pages have been fetched and the backend still reports more.
pub async fn list_all<S: PageSource>(
    source: &S,
    path: &str,
    max_pages: usize,
) -> Result<Vec<S::Entry>, S::Error> {
    let mut page = source.first_page(path).await?;
    let mut entries = Vec::new();
    let mut pages = 1;

    loop {
        entries.append(&mut page.entries);

        let Some(cursor) = page.next.take() else {
            trace!("list_all: {} complete after {} pages", path, pages);
            return Ok(entries);
        };

        if pages >= max_pages {
            warn!(
                "list_all: {} still has more after {} pages, giving up",
                path, pages
            );
            return Err(AdapterError::io(format!(
                "Listing of {} exceeded {} pages",
                path, max_pages
            ))
            .into());
        }

        page = source.next_page(&cursor).await?;
        pages += 1;
    }
}
