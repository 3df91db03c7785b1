pub mod areas;
pub mod health;
pub mod likes;
pub mod listings;
pub mod matches;

use rent_shared::errors::{AppError, AppResult};

use crate::matching::MatchEngine;
use crate::AppState;

/// Run a blocking engine call on the blocking pool, bounded by the request
/// timeout. The storage call may keep running after the timeout fires; its
/// result is discarded.
pub async fn run_blocking<T, F>(state: &AppState, f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&MatchEngine) -> AppResult<T> + Send + 'static,
{
    let engine = state.engine.clone();
    let task = tokio::task::spawn_blocking(move || f(&engine));

    match tokio::time::timeout(state.config.request_timeout(), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AppError::Internal(anyhow::anyhow!(
            "storage task failed: {join_err}"
        ))),
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.config.request_timeout_ms,
                "storage call timed out"
            );
            Err(AppError::timeout("request timed out"))
        }
    }
}
