//! Offset-based paging over stores that window by page index.
//!
//! Callers speak in raw offsets (`from`, `size`); stores speak in page index +
//! page size. An [`OffsetCursor`] carries both views at once: it keeps the
//! part of the offset that does not fall on a page boundary as a residual, so
//! `page_index * page_size + residual == offset` always holds.

use std::borrow::Cow;
use std::num::NonZeroU32;

/// Sentinel page size standing in for "no upper bound".
pub const UNBOUNDED_PAGE_SIZE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSize {
    Bounded(NonZeroU32),
    Unbounded,
}

impl PageSize {
    /// `None` for a zero size. Sizes at or above the sentinel normalize to
    /// `Unbounded`, so equality never depends on how "unbounded" was spelled.
    pub fn new(size: u32) -> Option<Self> {
        if size >= UNBOUNDED_PAGE_SIZE {
            return Some(PageSize::Unbounded);
        }
        NonZeroU32::new(size).map(PageSize::Bounded)
    }

    pub fn get(&self) -> u32 {
        match self {
            PageSize::Bounded(n) => n.get(),
            PageSize::Unbounded => UNBOUNDED_PAGE_SIZE,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, PageSize::Unbounded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

/// Booking fields a store knows how to order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    Id,
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: Direction,
}

/// Ordered list of sort keys; empty means unsorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Sort {
    orders: Vec<SortOrder>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(key: SortKey, direction: Direction) -> Self {
        Self {
            orders: vec![SortOrder { key, direction }],
        }
    }

    /// Append a tie-breaker.
    pub fn then(mut self, key: SortKey, direction: Direction) -> Self {
        self.orders.push(SortOrder { key, direction });
        self
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> &[SortOrder] {
        &self.orders
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerError {
    NegativeOffset(i64),
    NonPositiveSize(i64),
}

impl std::fmt::Display for PagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PagerError::NegativeOffset(o) => write!(f, "offset must not be negative, got {o}"),
            PagerError::NonPositiveSize(s) => write!(f, "page size must be at least 1, got {s}"),
        }
    }
}

impl std::error::Error for PagerError {}

/// A window `(page_index, page_size, residual, sort)` into a sorted result set.
///
/// Navigation returns `Cow::Borrowed(self)` when the move is a no-op, so
/// callers can tell "nothing changed" by pointer identity without cloning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetCursor {
    page: u64,
    size: PageSize,
    residual: u32,
    sort: Sort,
}

impl OffsetCursor {
    /// Build a cursor from caller-facing paging parameters.
    ///
    /// Missing offset means 0, missing size means unbounded, missing sort
    /// means unsorted.
    pub fn of_offset(
        offset: Option<i64>,
        size: Option<i64>,
        sort: Option<Sort>,
    ) -> Result<Self, PagerError> {
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(PagerError::NegativeOffset(offset));
        }
        let size = match size {
            None => PageSize::Unbounded,
            Some(s) if s < 1 => return Err(PagerError::NonPositiveSize(s)),
            Some(s) => {
                let clamped = u32::try_from(s).unwrap_or(UNBOUNDED_PAGE_SIZE);
                PageSize::new(clamped).ok_or(PagerError::NonPositiveSize(s))?
            }
        };
        Ok(Self::at(offset as u64, size, sort.unwrap_or_default()))
    }

    /// Unbounded, unsorted cursor at offset 0.
    pub fn everything() -> Self {
        Self::at(0, PageSize::Unbounded, Sort::unsorted())
    }

    fn at(offset: u64, size: PageSize, sort: Sort) -> Self {
        let step = u64::from(size.get());
        Self {
            page: offset / step,
            size,
            residual: (offset % step) as u32,
            sort,
        }
    }

    pub fn page_index(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> PageSize {
        self.size
    }

    pub fn residual(&self) -> u32 {
        self.residual
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Absolute offset of the first row in the window.
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_mul(u64::from(self.size.get()))
            .saturating_add(u64::from(self.residual))
    }

    /// Row limit of the window; `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self.size {
            PageSize::Bounded(n) => Some(n.get() as usize),
            PageSize::Unbounded => None,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.offset() > 0
    }

    /// Apply the window to an already sorted sequence.
    pub fn window<I: Iterator>(&self, rows: I) -> impl Iterator<Item = I::Item> {
        let skip = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let take = self.limit().unwrap_or(usize::MAX);
        rows.skip(skip).take(take)
    }

    pub fn next(&self) -> Cow<'_, Self> {
        if self.size.is_unbounded() {
            return Cow::Borrowed(self);
        }
        Cow::Owned(Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        })
    }

    /// Step back exactly one page, clamping at offset 0.
    pub fn previous(&self) -> Cow<'_, Self> {
        if !self.has_previous() {
            return Cow::Borrowed(self);
        }
        let back = self.offset().saturating_sub(u64::from(self.size.get()));
        Cow::Owned(Self::at(back, self.size, self.sort.clone()))
    }

    pub fn first(&self) -> Cow<'_, Self> {
        if !self.has_previous() {
            return Cow::Borrowed(self);
        }
        Cow::Owned(Self::at(0, self.size, self.sort.clone()))
    }

    /// Jump to page `page`, keeping the residual offset.
    pub fn with_page(&self, page: u64) -> Cow<'_, Self> {
        if page == self.page {
            return Cow::Borrowed(self);
        }
        Cow::Owned(Self {
            page,
            ..self.clone()
        })
    }

    pub fn with_sort(&self, sort: Sort) -> Cow<'_, Self> {
        if sort == self.sort {
            return Cow::Borrowed(self);
        }
        Cow::Owned(Self {
            sort,
            ..self.clone()
        })
    }
}

impl Default for OffsetCursor {
    fn default() -> Self {
        Self::everything()
    }
}
