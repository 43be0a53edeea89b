use chrono::{DateTime, Datelike, Utc};
use std::fmt;

pub const REF_MAX_LEN: usize = 128;
pub const DISPLAY_NAME_MAX_LEN: usize = 255;
pub const DESCRIPTION_MAX_LEN: usize = 1024;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 255;
pub const SEARCH_MAX_LEN: usize = 200;
/// Inclusive calendar-year window accepted for caller-supplied timestamps.
pub const MIN_TIMESTAMP_YEAR: i32 = 1970;
pub const MAX_TIMESTAMP_YEAR: i32 = 9999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Opaque collaborator identifiers: printable, no whitespace.
pub fn validate_ref(field: &'static str, value: &str) -> ValidationResult {
    validate_required(field, value)?;
    validate_max_len(field, value, REF_MAX_LEN)?;

    if value.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(ValidationError::new(
            field,
            "must not contain whitespace or control characters",
        ));
    }

    Ok(())
}

pub fn validate_idempotency_key(key: &str) -> ValidationResult {
    validate_required("idempotency_key", key)?;
    validate_max_len("idempotency_key", key, IDEMPOTENCY_KEY_MAX_LEN)?;

    if !key.chars().all(|ch| ch.is_ascii_graphic()) {
        return Err(ValidationError::new(
            "idempotency_key",
            "must contain only visible ASCII characters",
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(field: &'static str, amount_cents: i64) -> ValidationResult {
    if amount_cents <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_timestamp(field: &'static str, at: DateTime<Utc>) -> ValidationResult {
    if !(MIN_TIMESTAMP_YEAR..=MAX_TIMESTAMP_YEAR).contains(&at.year()) {
        return Err(ValidationError::new(
            field,
            format!(
                "must fall within years {}..={}",
                MIN_TIMESTAMP_YEAR, MAX_TIMESTAMP_YEAR
            ),
        ));
    }

    Ok(())
}

/// Sanitize an optional free-text field; blank input becomes `None`.
pub fn clean_optional(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, ValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = sanitize_string(value);
    if value.is_empty() {
        return Ok(None);
    }
    validate_max_len(field, &value, max_len)?;
    Ok(Some(value))
}
