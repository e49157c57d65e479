//! Audit digest of finalized snapshots
//!
//! The audit log stores only `hex(sha256(secret ‖ canonical_json(snapshot)))`.
//! Canonical JSON is compact serde_json output with object keys sorted at
//! every level, so the digest does not depend on field declaration order.

use crate::error::ScoringResult;
use crate::types::ArtifactSnapshot;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Compact JSON with sorted object keys
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the secret followed by the canonical snapshot
pub fn snapshot_digest(secret: Option<&str>, snapshot: &ArtifactSnapshot) -> ScoringResult<String> {
    let json = canonical_json(&serde_json::to_value(snapshot)?);

    let mut hasher = Sha256::new();
    if let Some(secret) = secret {
        hasher.update(secret.as_bytes());
    }
    hasher.update(json.as_bytes());

    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn insert_audit(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    plan: &str,
    digest: &str,
    created_at: DateTime<Utc>,
) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO scoring_audit_log (session_id, plan, snapshot_digest, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(plan)
    .bind(digest)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
