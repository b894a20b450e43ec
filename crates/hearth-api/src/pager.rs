//! Cursor pagination.
//!
//! A [`Pager`] turns a page-fetch function into a lazy, forward-only sequence.
//! It is pull-based: a page is only requested when the consumer reads past the
//! buffered one, and no page is ever requested twice.

use std::collections::VecDeque;

use futures_util::Stream;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::trace;

use crate::ApiError;

/// Default page size requested from the server.
pub const DEFAULT_PAGE_LIMIT: u32 = 25;

/// Which cursor of a page to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    #[default]
    Next,
    Prev,
}

impl CursorDirection {
    /// Query parameter used to pass a cursor in this direction.
    pub fn param(self) -> &'static str {
        match self {
            CursorDirection::Next => "next",
            CursorDirection::Prev => "prev",
        }
    }
}

/// Opaque cursor pair returned alongside a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl PageCursor {
    pub fn get(&self, direction: CursorDirection) -> Option<&String> {
        match direction {
            CursorDirection::Next => self.next.as_ref(),
            CursorDirection::Prev => self.prev.as_ref(),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: PageCursor,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, cursor: PageCursor) -> Self {
        Self { items, cursor }
    }

    /// A final page (no further cursor).
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: PageCursor::default(),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            cursor: self.cursor,
        }
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Page<Value> {
    /// Decode the platform envelope:
    /// `{"data": {<key>: {"items": [..], "paging": {"cursors": {..}, "hasNext": ..}}}}`.
    pub fn from_platform(body: &Value, key: &str) -> Result<Self, ApiError> {
        let section = body
            .get("data")
            .and_then(|d| d.get(key))
            .ok_or_else(|| ApiError::InvalidResponse(format!("missing data.{} in page", key)))?;

        let items = section
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let paging = section.get("paging");
        let cursors = paging.and_then(|p| p.get("cursors"));
        let has_next = paging
            .and_then(|p| p.get("hasNext"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let has_prev = paging
            .and_then(|p| p.get("hasPrev"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let next = non_empty(cursors.and_then(|c| c.get("next"))).filter(|_| has_next);
        let prev = non_empty(cursors.and_then(|c| c.get("prev"))).filter(|_| has_prev);

        Ok(Page::new(items, PageCursor { prev, next }))
    }

    /// Decode the chat provider envelope: `{<key>: [..], "next": ".."}`.
    /// The provider has no backward cursor; an empty `next` ends the sequence.
    pub fn from_chat(body: &Value, key: &str) -> Result<Self, ApiError> {
        let items = body
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse(format!("missing {} in page", key)))?;

        Ok(Page::new(
            items,
            PageCursor {
                prev: None,
                next: non_empty(body.get("next")),
            },
        ))
    }
}

/// Fetches one page: `(limit, direction, cursor)`; a `None` cursor means the first page.
pub type PageFetch<T> = Box<
    dyn FnMut(u32, CursorDirection, Option<String>) -> BoxFuture<'static, Result<Page<T>, ApiError>>
        + Send,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagerState {
    NotStarted,
    HasMore,
    Finished,
}

/// Lazy, forward-only, non-restartable sequence over a paged endpoint.
pub struct Pager<T> {
    fetch: PageFetch<T>,
    limit: u32,
    direction: CursorDirection,
    buffer: VecDeque<T>,
    cursor: Option<String>,
    state: PagerState,
    fetches: usize,
}

impl<T> std::fmt::Debug for Pager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("limit", &self.limit)
            .field("direction", &self.direction)
            .field("buffered", &self.buffer.len())
            .field("state", &self.state)
            .field("fetches", &self.fetches)
            .finish()
    }
}

impl<T: Send + 'static> Pager<T> {
    pub fn new(fetch: PageFetch<T>) -> Self {
        Self {
            fetch,
            limit: DEFAULT_PAGE_LIMIT,
            direction: CursorDirection::Next,
            buffer: VecDeque::new(),
            cursor: None,
            state: PagerState::NotStarted,
            fetches: 0,
        }
    }

    /// Page size to request.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Follow `prev` cursors instead of `next`.
    pub fn backward(mut self) -> Self {
        self.direction = CursorDirection::Prev;
        self
    }

    /// Number of page fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Whether the sequence has ended (further reads yield `None` without I/O).
    pub fn is_finished(&self) -> bool {
        self.state == PagerState::Finished && self.buffer.is_empty()
    }

    /// Next item, fetching at most one page.
    ///
    /// A fetch failure is returned once; the pager is finished afterwards.
    pub async fn next(&mut self) -> Result<Option<T>, ApiError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }

        // The cursor only moves once a page has arrived, so a cancelled
        // `next()` resumes from the same position.
        let cursor = match self.state {
            PagerState::Finished => return Ok(None),
            PagerState::NotStarted => None,
            PagerState::HasMore => self.cursor.clone(),
        };

        self.fetches += 1;
        trace!(fetch = self.fetches, cursor = ?cursor, "fetching page");

        let page = match (self.fetch)(self.limit, self.direction, cursor).await {
            Ok(page) => page,
            Err(e) => {
                self.state = PagerState::Finished;
                return Err(e);
            }
        };

        let next = page.cursor.get(self.direction).cloned();
        // An empty page ends the sequence even if the server hands back a cursor.
        let empty = page.items.is_empty();
        self.buffer.extend(page.items);

        match next {
            Some(cursor) if !empty => {
                self.cursor = Some(cursor);
                self.state = PagerState::HasMore;
            }
            _ => self.state = PagerState::Finished,
        }

        Ok(self.buffer.pop_front())
    }

    /// Read up to `n` items.
    pub async fn take_n(&mut self, n: usize) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::with_capacity(n.min(self.limit as usize));
        while items.len() < n {
            match self.next().await? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    /// Drain the whole sequence.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Adapt into a `Stream`. The stream ends after yielding an error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, ApiError>> + Send {
        futures_util::stream::unfold(self, |mut pager| async move {
            match pager.next().await {
                Ok(Some(item)) => Some((Ok(item), pager)),
                Ok(None) => None,
                Err(e) => Some((Err(e), pager)),
            }
        })
    }
}
