//! Stateless request parameters for reading the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::transaction::{Transaction, TransactionStatus, TransactionType};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Half-open interval on `created_at`: `from <= t < to`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from >= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub kind: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub teacher_ref: Option<String>,
    pub student_ref: Option<String>,
    pub course_ref: Option<String>,
    pub range: DateRange,
    pub search: Option<String>,
}

impl TransactionFilter {
    pub fn completed(kind: TransactionType) -> Self {
        Self {
            kind: Some(kind),
            status: Some(TransactionStatus::Completed),
            ..Self::default()
        }
    }

    pub fn in_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Search text trimmed and lowercased; blank means no search.
    pub fn search_needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Every supplied predicate must hold. `needle` is `search_needle()`,
    /// computed once per query by the caller.
    pub fn matches(&self, tx: &Transaction, needle: Option<&str>) -> bool {
        self.kind.map_or(true, |kind| tx.kind == kind)
            && self.status.map_or(true, |status| tx.status == status)
            && self
                .teacher_ref
                .as_deref()
                .map_or(true, |r| tx.teacher_ref == r)
            && self
                .student_ref
                .as_deref()
                .map_or(true, |r| tx.student_ref.as_deref() == Some(r))
            && self
                .course_ref
                .as_deref()
                .map_or(true, |r| tx.course_ref.as_deref() == Some(r))
            && self.range.contains(tx.created_at)
            && needle.map_or(true, |needle| tx.matches_search(needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Clamp to `page >= 1` and `1 <= limit <= MAX_PAGE_LIMIT`.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    CreatedAt,
    GrossAmount,
    TeacherAmount,
}

impl SortBy {
    pub fn column(&self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::GrossAmount => "gross_amount",
            SortBy::TeacherAmount => "teacher_amount",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Defaults to newest first. Ties always fall back to `id` in the same
/// direction so that offset pages never overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub by: SortBy,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(by: SortBy, direction: SortDirection) -> Self {
        Self { by, direction }
    }

    pub fn compare(&self, a: &Transaction, b: &Transaction) -> Ordering {
        let primary = match self.by {
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            SortBy::GrossAmount => a.gross_amount.cmp(&b.gross_amount),
            SortBy::TeacherAmount => a.teacher_amount.cmp(&b.teacher_amount),
        };
        let ordering = primary.then_with(|| a.id.cmp(&b.id));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let limit = u64::from(request.limit);
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
            pages: total.div_ceil(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::Parties;
    use chrono::TimeZone;

    #[test]
    fn page_request_clamps() {
        assert_eq!(PageRequest::new(Some(0), Some(0)), PageRequest { page: 1, limit: 1 });
        assert_eq!(PageRequest::new(None, Some(5_000)).limit, MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::default(), PageRequest { page: 1, limit: 20 });
        assert_eq!(PageRequest::new(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn page_counts_round_up() {
        let page: Page<u8> = Page::new(vec![], 21, PageRequest::new(Some(1), Some(10)));
        assert_eq!(page.pages, 3);
        let empty: Page<u8> = Page::new(vec![], 0, PageRequest::default());
        assert_eq!(empty.pages, 0);
    }

    #[test]
    fn date_range_is_half_open() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let range = DateRange::new(Some(from), Some(to));
        assert!(range.contains(from));
        assert!(!range.contains(to));
        assert!(DateRange::default().contains(to));
        assert!(DateRange::new(Some(to), Some(from)).is_empty());
    }

    #[test]
    fn blank_search_is_ignored() {
        let filter = TransactionFilter {
            search: Some("   ".to_string()),
            ..TransactionFilter::default()
        };
        assert_eq!(filter.search_needle(), None);
    }

    #[test]
    fn search_matches_names_case_insensitively() {
        let parties = Parties {
            course_title: Some("Intro to Rust".to_string()),
            ..Parties::teacher("t-1")
        };
        let tx = Transaction::payment(
            1_000,
            1_000,
            parties,
            TransactionStatus::Completed,
            None,
            Utc::now(),
        )
        .unwrap();
        let filter = TransactionFilter {
            search: Some(" RUST ".to_string()),
            ..TransactionFilter::default()
        };

        let needle = filter.search_needle();
        assert_eq!(needle.as_deref(), Some("rust"));
        assert!(filter.matches(&tx, needle.as_deref()));
        assert!(!filter.matches(&tx, Some("python")));
        assert!(filter.matches(&tx, None));
    }
}
