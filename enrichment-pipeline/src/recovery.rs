use chrono::Duration;
use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::Document, image::Image},
    },
};

/// Reset entities stuck in `processing` past the threshold to `failed`
/// so callers may retry them. Runs on a schedule from the main process.
#[instrument(skip(db))]
pub async fn recover_stuck_entities(
    db: &SurrealDbClient,
    older_than: Duration,
) -> Result<(usize, usize), AppError> {
    let documents = Document::reset_stuck(older_than, db).await?;
    let images = Image::reset_stuck(older_than, db).await?;

    if !documents.is_empty() || !images.is_empty() {
        info!(
            documents = documents.len(),
            images = images.len(),
            "Reset stuck entities"
        );
    }
    Ok((documents.len(), images.len()))
}
