use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{
    DateRange, Page, PageRequest, SortBy, SortDirection, SortSpec, Transaction, TransactionFilter,
    TransactionStatus, TransactionType,
};
use crate::error::AppError;
use crate::handlers::auth::SignedJson;
use crate::services::{RecordPayment, RecordRefund};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub teacher_ref: Option<String>,
    pub student_ref: Option<String>,
    pub course_ref: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<SortBy>,
    pub direction: Option<SortDirection>,
}

impl ListParams {
    pub fn filter(&self) -> TransactionFilter {
        TransactionFilter {
            kind: self.kind,
            status: self.status,
            teacher_ref: self.teacher_ref.clone(),
            student_ref: self.student_ref.clone(),
            course_ref: self.course_ref.clone(),
            range: DateRange::new(self.from, self.to),
            search: self.search.clone(),
        }
    }

    pub fn sort(&self) -> SortSpec {
        SortSpec::new(
            self.sort_by.unwrap_or_default(),
            self.direction.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
}

fn query_params(params: Result<Query<ListParams>, QueryRejection>) -> Result<ListParams, AppError> {
    params
        .map(|Query(params)| params)
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

pub async fn record_payment(
    State(state): State<AppState>,
    SignedJson(input): SignedJson<RecordPayment>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.ledger.record_payment(input).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn record_refund(
    State(state): State<AppState>,
    SignedJson(input): SignedJson<RecordRefund>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.ledger.record_refund(input).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    SignedJson(update): SignedJson<StatusUpdate>,
) -> Result<Json<Transaction>, AppError> {
    let tx = state.ledger.update_status(id, update.status).await?;
    Ok(Json(tx))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.gateway.get(id).await?))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Page<Transaction>>, AppError> {
    let params = query_params(params)?;
    let page = PageRequest::new(params.page, params.limit);
    let result = state
        .gateway
        .query(&params.filter(), page, params.sort())
        .await?;
    Ok(Json(result))
}

pub async fn export_transactions(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let params = query_params(params)?;
    let csv = state
        .gateway
        .export_csv(&params.filter(), params.sort())
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"transactions.csv\"",
            ),
        ],
        csv,
    ))
}
