use mongodb::bson::doc;
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    #[serde(rename = "_id")]
    name: String,
    seq: i64,
}

// Monotonic integer ids per collection. The public API contract uses integer
// ids, so each insert first claims the next value from the counters
// collection (atomic $inc with upsert).
pub async fn next_id(db: &Database, sequence: &str) -> Result<i64> {
    let counters: Collection<Counter> = db.collection("counters");

    let counter = counters
        .find_one_and_update(doc! { "_id": sequence }, doc! { "$inc": { "seq": 1 } })
        .upsert(true)
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| AppError::service("sequence allocation returned no document"))?;

    Ok(counter.seq)
}
