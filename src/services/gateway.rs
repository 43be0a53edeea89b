//! Read access for presentation layers: filtered, sorted, paginated
//! transaction lists and CSV export.

use std::sync::Arc;

use crate::domain::{Page, PageRequest, SortSpec, Transaction, TransactionFilter};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::validation::{validate_max_len, validate_ref, SEARCH_MAX_LEN};

pub const EXPORT_ROW_LIMIT: usize = 10_000;

pub struct QueryGateway {
    store: Arc<dyn TransactionStore>,
}

impl QueryGateway {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Page of matching rows. No matches is an empty page, not an error.
    pub async fn query(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
        sort: SortSpec,
    ) -> Result<Page<Transaction>, AppError> {
        check_filter(filter)?;
        let page = PageRequest::new(Some(page.page), Some(page.limit));
        Ok(self.store.query(filter, &page, &sort).await?)
    }

    pub async fn get(&self, id: uuid::Uuid) -> Result<Transaction, AppError> {
        Ok(self.store.get(id).await?)
    }

    /// Matching rows as CSV, at most `EXPORT_ROW_LIMIT` of them in `sort` order.
    pub async fn export_csv(
        &self,
        filter: &TransactionFilter,
        sort: SortSpec,
    ) -> Result<Vec<u8>, AppError> {
        check_filter(filter)?;

        let mut rows = self.store.scan(filter).await?;
        rows.sort_by(|a, b| sort.compare(a, b));
        let truncated = rows.len() > EXPORT_ROW_LIMIT;
        rows.truncate(EXPORT_ROW_LIMIT);

        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &rows {
            writer
                .serialize(row)
                .map_err(|e| AppError::Internal(format!("csv encoding failed: {}", e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("csv flush failed: {}", e)))?;

        tracing::info!(rows = rows.len(), truncated, "transactions exported");
        Ok(bytes)
    }
}

fn check_filter(filter: &TransactionFilter) -> Result<(), AppError> {
    if filter.range.is_empty() {
        return Err(AppError::Validation(
            "range: from must be earlier than to".to_string(),
        ));
    }
    for (field, value) in [
        ("teacher_ref", &filter.teacher_ref),
        ("student_ref", &filter.student_ref),
        ("course_ref", &filter.course_ref),
    ] {
        if let Some(value) = value {
            validate_ref(field, value)?;
        }
    }
    if let Some(search) = &filter.search {
        validate_max_len("search", search, SEARCH_MAX_LEN)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransactionStore;
    use crate::domain::{
        DateRange, Parties, SortBy, SortDirection, TransactionStatus, TransactionType,
    };
    use chrono::{Duration, TimeZone, Utc};

    async fn seeded() -> QueryGateway {
        let store = Arc::new(InMemoryTransactionStore::new());
        let base = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let names = ["Rust for Beginners", "Advanced Algebra", "rusty Guitar"];
        for (i, title) in names.iter().enumerate() {
            let parties = Parties {
                course_title: Some(title.to_string()),
                teacher_name: Some(format!("Teacher {}", i)),
                ..Parties::teacher(format!("t-{}", i))
            };
            let tx = Transaction::payment(
                1_000 * (i as i64 + 1),
                1_000,
                parties,
                TransactionStatus::Completed,
                None,
                base + Duration::days(i as i64),
            )
            .unwrap();
            store.append(&tx).await.unwrap();
        }
        QueryGateway::new(store)
    }

    #[tokio::test]
    async fn search_is_case_insensitive_substring() {
        let gateway = seeded().await;
        let filter = TransactionFilter {
            search: Some("RUST".into()),
            ..TransactionFilter::default()
        };
        let page = gateway
            .query(&filter, PageRequest::default(), SortSpec::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        // Newest first by default.
        assert_eq!(page.items[0].course_title.as_deref(), Some("rusty Guitar"));
    }

    #[tokio::test]
    async fn no_match_is_empty_page() {
        let gateway = seeded().await;
        let filter = TransactionFilter {
            kind: Some(TransactionType::Refund),
            ..TransactionFilter::default()
        };
        let page = gateway
            .query(&filter, PageRequest::default(), SortSpec::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.pages, 0);
    }

    #[tokio::test]
    async fn rejects_inverted_range() {
        let gateway = seeded().await;
        let now = Utc::now();
        let filter = TransactionFilter::default().in_range(DateRange::new(Some(now), Some(now)));
        let err = gateway
            .query(&filter, PageRequest::default(), SortSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn exports_sorted_csv_with_header() {
        let gateway = seeded().await;
        let csv = gateway
            .export_csv(
                &TransactionFilter::default(),
                SortSpec::new(SortBy::GrossAmount, SortDirection::Asc),
            )
            .await
            .unwrap();
        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("id,type,status,gross_amount"));
        assert!(lines[1].contains(",payment,completed,1000,100,900,"));
        assert!(lines[3].contains(",3000,300,2700,"));
    }
}
