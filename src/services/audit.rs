use mongodb::{Collection, Database};
use serde_json::Value;
use tracing::warn;

use crate::database::counters;
use crate::errors::Result;
use crate::models::audit::{LogAction, SystemLog};

// Best-effort append to the audit trail. A failed write is logged and
// swallowed so auditing can never fail the action it records.
pub async fn record(db: &Database, action: LogAction, user_id: Option<i64>, details: Value) {
    if let Err(err) = try_record(db, action, user_id, details).await {
        warn!("failed to write audit log for {}: {}", action.as_str(), err);
    }
}

async fn try_record(
    db: &Database,
    action: LogAction,
    user_id: Option<i64>,
    details: Value,
) -> Result<()> {
    let logs: Collection<SystemLog> = db.collection("system_logs");

    let entry = SystemLog {
        id: counters::next_id(db, "system_logs").await?,
        action,
        user_id,
        details,
        created_at: chrono::Utc::now(),
    };

    logs.insert_one(&entry).await?;
    Ok(())
}
