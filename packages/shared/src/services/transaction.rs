use tracing::warn;

use crate::repositories::errors::StoreError;
use crate::repositories::store::StoreTransaction;

/// Commits on success, rolls back on failure.
pub(crate) async fn complete<T, E>(
    tx: Box<dyn StoreTransaction>,
    result: Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            discard(tx).await;
            Err(e)
        }
    }
}

pub(crate) async fn discard(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
