//! Pagination engine.
//!
//! # Responsibility
//! - Combine a COUNT query and a windowed content query into one `Page`.
//!
//! # Invariants
//! - Page size is always positive.
//! - Both statements are rendered (and validated) before either runs; they
//!   then run sequentially in the caller's transaction.
//! - An index past the last page yields empty content with correct totals.

use crate::db::TxHandle;
use crate::error::{RepoError, RepoResult};
use crate::model::entity::Entity;
use crate::model::projection::Projection;
use crate::query::builder::build_count;
use crate::query::description::{QueryDescription, Sort};
use crate::query::mapper::FromRow;
use crate::repo::entity_repo::{count_value, fetch_native, run_count, PreparedSelect};
use log::debug;
use rusqlite::types::Value;
use serde::{Serialize, Serializer};

/// Zero-based page index, positive page size and optional sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    index: u32,
    size: u32,
    sort: Option<Sort>,
}

impl PageRequest {
    pub fn of(index: u32, size: u32) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidPageRequest { size });
        }
        Ok(Self {
            index,
            size,
            sort: None,
        })
    }

    /// Overrides the sort of the paged description.
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    /// Row offset of the first element of this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.index) * u64::from(self.size)
    }

    /// `query` windowed to this page, with this request's sort when present.
    fn window(&self, query: &QueryDescription) -> QueryDescription {
        let mut windowed = query.clone().limit(u64::from(self.size)).offset(self.offset());
        if let Some(sort) = &self.sort {
            windowed = windowed.sorted(sort.clone());
        }
        windowed
    }
}

/// One page of results plus the totals of the whole result set.
///
/// Serializes with the derived values (`totalPages`, `first`, `last`,
/// `hasNext`, `hasPrevious`, `numberOfElements`) next to the stored ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    content: Vec<T>,
    number: u32,
    size: u32,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.index,
            size: request.size,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    /// Zero-based page index.
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(u64::from(self.size))
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn has_next(&self) -> bool {
        (u64::from(self.number) + 1) * u64::from(self.size) < self.total_elements
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageView<'a, T> {
    content: &'a [T],
    number: u32,
    size: u32,
    number_of_elements: usize,
    total_elements: u64,
    total_pages: u64,
    first: bool,
    last: bool,
    has_next: bool,
    has_previous: bool,
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PageView {
            content: &self.content,
            number: self.number,
            size: self.size,
            number_of_elements: self.number_of_elements(),
            total_elements: self.total_elements,
            total_pages: self.total_pages(),
            first: self.is_first(),
            last: self.is_last(),
            has_next: self.has_next(),
            has_previous: self.has_previous(),
        }
        .serialize(serializer)
    }
}

/// Pages full entities matching `query`.
pub fn paginate<E: Entity>(
    tx: &TxHandle<'_>,
    query: &QueryDescription,
    request: &PageRequest,
) -> RepoResult<Page<E>> {
    let content = PreparedSelect::entity::<E>(&request.window(query))?;
    run_paged(tx, query, request, content)
}

/// Pages projection `P` over rows matching `query`.
pub fn paginate_projected<P: Projection>(
    tx: &TxHandle<'_>,
    query: &QueryDescription,
    request: &PageRequest,
) -> RepoResult<Page<P>> {
    let content = PreparedSelect::projection::<P>(&request.window(query))?;
    run_paged(tx, query, request, content)
}

/// Pages hand-written SQL with its own COUNT statement.
///
/// `sql` must not carry LIMIT/OFFSET; the request's window is appended. The
/// request's sort is not applied, so ordering belongs in `sql`.
pub fn paginate_native<T: FromRow>(
    tx: &TxHandle<'_>,
    sql: &str,
    count_sql: &str,
    params: &[Value],
    request: &PageRequest,
) -> RepoResult<Page<T>> {
    let total = count_value(&tx.query(count_sql, params)?)?;
    let windowed = format!(
        "{} LIMIT {} OFFSET {}",
        sql.trim_end().trim_end_matches(';'),
        request.size,
        request.offset()
    );
    let content = fetch_native(tx, &windowed, params)?;
    log_page("native", request, total, content.len());
    Ok(Page::new(content, request, total))
}

fn run_paged<T: FromRow>(
    tx: &TxHandle<'_>,
    query: &QueryDescription,
    request: &PageRequest,
    content: PreparedSelect,
) -> RepoResult<Page<T>> {
    let count = build_count(query)?;
    let total = run_count(tx, &count)?;
    let rows: Vec<T> = content.fetch(tx)?;
    log_page(query.entity().name, request, total, rows.len());
    Ok(Page::new(rows, request, total))
}

fn log_page(shape: &str, request: &PageRequest, total: u64, returned: usize) {
    debug!(
        "event=paginate module=repo status=ok shape={} index={} size={} total={} returned={}",
        shape, request.index, request.size, total, returned
    );
}
