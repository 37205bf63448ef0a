use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::{Error, Result};
use crate::model::Alert;
use crate::store::FleetStore;

/// Resolves an open alert, stamping `resolved_at`. Resolving twice is a
/// validation error so the first timestamp is never overwritten.
pub async fn resolve(store: &dyn FleetStore, alert_id: i64, now: DateTime<Utc>) -> Result<Alert> {
    let alert = store
        .find_alert(alert_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("alert {} does not exist", alert_id)))?;

    if alert.is_resolved {
        return Err(Error::Validation(format!(
            "alert {} is already resolved",
            alert_id
        )));
    }

    // A concurrent resolve may land between the read and the update.
    let resolved = store
        .mark_alert_resolved(alert_id, now)
        .await?
        .ok_or_else(|| Error::Validation(format!("alert {} is already resolved", alert_id)))?;

    info!(alert_id, device_id = resolved.device_id, "Alert resolved");
    Ok(resolved)
}
