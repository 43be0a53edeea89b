use axum::{
    extract::{Path, State},
    Json,
};

use crate::domain::TeacherPayoutBalance;
use crate::error::AppError;
use crate::validation::validate_ref;
use crate::AppState;

pub async fn get_balance(
    State(state): State<AppState>,
    Path(teacher_ref): Path<String>,
) -> Result<Json<TeacherPayoutBalance>, AppError> {
    validate_ref("teacher_ref", &teacher_ref)?;
    let balance = state.aggregator.teacher_balance(&teacher_ref).await?;
    Ok(Json(balance))
}
