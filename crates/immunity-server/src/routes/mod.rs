pub mod builds;
pub mod legacy;
pub mod regions;

use immunity_core::Pipeline;

use crate::error::AppError;
use crate::state::AppState;

/// Run pipeline work on the blocking pool.
pub(crate) async fn blocking<T, F>(app: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Pipeline) -> immunity_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pipeline = app.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || f(&pipeline))
        .await
        .map_err(AppError::join)??;
    Ok(result)
}
