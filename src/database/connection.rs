use mongodb::{Client, Database};

use crate::config::AppConfig;
use crate::errors::Result;

pub async fn connect(config: &AppConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.database_url).await?;
    let db = client.database(&config.database_name);

    // Verify the database is reachable by listing collections
    match db.list_collection_names().await {
        Ok(collections) => {
            tracing::info!(
                "✅ Connected to database '{}' ({} collections)",
                config.database_name,
                collections.len()
            );
        }
        Err(e) => {
            tracing::warn!(
                "⚠️ Database '{}' may not exist or is inaccessible: {}",
                config.database_name,
                e
            );
        }
    }

    Ok(db)
}
