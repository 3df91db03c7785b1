use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Parse an opaque id token taken from a path or query string.
///
/// Malformed tokens never reach the core; they fail here as `InvalidArgument`.
pub fn parse_id(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::invalid_argument(format!("invalid {what} id format")))
}
