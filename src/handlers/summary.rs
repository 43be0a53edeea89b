use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{DateRange, Granularity, PlatformRevenueSummary, SummaryRequest};
use crate::error::AppError;
use crate::AppState;

pub const MAX_TOP_TEACHERS: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct SummaryParams {
    pub granularity: Option<Granularity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub top: Option<usize>,
    /// Evaluate bucket completeness at this instant instead of now.
    pub as_of: Option<DateTime<Utc>>,
}

impl SummaryParams {
    pub fn into_request(self) -> SummaryRequest {
        let defaults = SummaryRequest::default();
        SummaryRequest {
            granularity: self.granularity.unwrap_or(defaults.granularity),
            range: DateRange::new(self.from, self.to),
            top: self.top.unwrap_or(defaults.top).min(MAX_TOP_TEACHERS),
            as_of: self.as_of,
        }
    }
}

pub async fn platform_summary(
    State(state): State<AppState>,
    params: Result<Query<SummaryParams>, QueryRejection>,
) -> Result<Json<PlatformRevenueSummary>, AppError> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let summary = state
        .aggregator
        .platform_summary(params.into_request())
        .await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_monthly_top_five() {
        let request = SummaryParams::default().into_request();
        assert_eq!(request.granularity, Granularity::Month);
        assert_eq!(request.top, 5);
        assert!(request.as_of.is_none());
    }

    #[test]
    fn caps_top() {
        let request = SummaryParams {
            top: Some(10_000),
            ..SummaryParams::default()
        }
        .into_request();
        assert_eq!(request.top, MAX_TOP_TEACHERS);
    }
}
