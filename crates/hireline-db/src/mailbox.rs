//! Durable fallback notifications for receivers with no live connection.

use anyhow::Result;
use hireline_types::models::{NotificationStatus, NotificationType};
use uuid::Uuid;

use crate::Database;
use crate::models::NotificationRow;

const NOTIFICATION_COLUMNS: &str = "id, receiver_id, type, payload, status, created_at";

impl Database {
    pub fn create_notification(
        &self,
        receiver_id: &str,
        kind: NotificationType,
        payload: &serde_json::Value,
    ) -> Result<NotificationRow> {
        let id = Uuid::new_v4().to_string();
        let now = crate::now_timestamp();
        let payload = payload.to_string();
        let status = NotificationStatus::Pending.as_str();

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, receiver_id, type, payload, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (&id, receiver_id, kind.as_str(), &payload, status, &now),
            )?;
            Ok(NotificationRow {
                id,
                receiver_id: receiver_id.to_string(),
                kind: kind.as_str().to_string(),
                payload,
                status: status.to_string(),
                created_at: now,
            })
        })
    }

    /// Notifications not yet read (PENDING or DELIVERED), newest first.
    pub fn list_pending_notifications(&self, receiver_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE receiver_id = ?1 AND status IN ('PENDING', 'DELIVERED')
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([receiver_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        receiver_id: row.get(1)?,
                        kind: row.get(2)?,
                        payload: row.get(3)?,
                        status: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Bulk status update. Only forward transitions are applied; ids that are
    /// unknown, owned by someone else (when `receiver_id` is given) or already
    /// at or past `status` are skipped. Returns the number of rows changed.
    pub fn update_notification_status(
        &self,
        receiver_id: Option<&str>,
        ids: &[String],
        status: NotificationStatus,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        // ?1 status, ?2 receiver (nullable), ?3.. ids
        let placeholders: Vec<String> = (3..ids.len() + 3).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "UPDATE notifications SET status = ?1
             WHERE (?2 IS NULL OR receiver_id = ?2)
               AND id IN ({})
               AND (CASE status WHEN 'PENDING' THEN 0 WHEN 'DELIVERED' THEN 1 ELSE 2 END) < {}",
            placeholders.join(", "),
            status.rank()
        );

        self.with_conn_mut(|conn| {
            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(ids.len() + 2);
            let status = status.as_str();
            params.push(&status);
            params.push(&receiver_id);
            params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let updated = conn.execute(&sql, params.as_slice())?;
            Ok(updated)
        })
    }
}
