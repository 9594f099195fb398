//! Request validation beyond the bare "non-empty message" check
//! (grounded on `app/utils/validation.py`): trimming and a max-length guard,
//! both feeding `VALIDATION_ERROR` at the HTTP boundary.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::ApiError;

const MAX_MESSAGE_CHARS: usize = 8_000;

/// Trims `raw` and rejects empty or over-long messages.
pub fn validate_message(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("message must not be empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation(format!(
            "message exceeds the maximum length of {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Bearer credential discovery: `Authorization: Bearer <t>` →
/// `body.user.token` → none.
pub fn extract_token(headers: &HeaderMap, body_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(rest) = s.strip_prefix("Bearer ") {
                let rest = rest.trim();
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
        }
    }
    body_token
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
