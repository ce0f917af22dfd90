use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::models::*;

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, notification_type, priority, title, \
     content, icon, action_url, is_read, read_at, reference_id, created_at";

const TEMPLATE_COLUMNS: &str = "id, name, notification_type, title_template, content_template, \
     icon, priority, is_active";

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        notification_type: parse_enum(2, row.get(2)?)?,
        priority: parse_enum(3, row.get(3)?)?,
        title: row.get(4)?,
        content: row.get(5)?,
        icon: row.get(6)?,
        action_url: row.get(7)?,
        is_read: row.get(8)?,
        read_at: row.get(9)?,
        reference_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<NotificationTemplate> {
    Ok(NotificationTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        notification_type: parse_enum(2, row.get(2)?)?,
        title_template: row.get(3)?,
        content_template: row.get(4)?,
        icon: row.get(5)?,
        priority: parse_enum(6, row.get(6)?)?,
        is_active: row.get(7)?,
    })
}

impl EcoDb {
    // ── Notifications ─────────────────────────────────────────────────

    pub fn create_notification(&self, n: &NewNotification) -> Result<Notification> {
        self.conn
            .execute(
                "INSERT INTO notifications
                    (recipient_id, notification_type, priority, title, content, icon,
                     action_url, reference_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    n.recipient_id,
                    n.notification_type.as_str(),
                    n.priority.as_str(),
                    n.title,
                    n.content,
                    n.icon,
                    n.action_url,
                    n.reference_id,
                ],
            )
            .context("Failed to insert notification")?;
        let id = self.conn.last_insert_rowid();
        self.get_notification(n.recipient_id, id)?
            .context("Notification not found after insert")
    }

    pub fn get_notification(&self, user_id: i64, id: i64) -> Result<Option<Notification>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                     WHERE id = ?1 AND recipient_id = ?2"
                ),
                params![id, user_id],
                row_to_notification,
            )
            .optional()
            .context("Failed to query notification")
    }

    pub fn list_notifications(&self, user_id: i64, unread_only: bool) -> Result<Vec<Notification>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC, id DESC"
            ))
            .context("Failed to prepare list_notifications")?;
        let rows = stmt
            .query_map(params![user_id, unread_only], row_to_notification)
            .context("Failed to query notifications")?;
        collect(rows, "notification")
    }

    /// Mark one notification read. `read_at` is set on the first transition
    /// only. Returns `None` when the user doesn't own it.
    pub fn mark_notification_read(&self, user_id: i64, id: i64) -> Result<Option<Notification>> {
        self.conn
            .execute(
                "UPDATE notifications SET is_read = 1, read_at = datetime('now')
                 WHERE id = ?1 AND recipient_id = ?2 AND is_read = 0",
                params![id, user_id],
            )
            .context("Failed to mark notification read")?;
        self.get_notification(user_id, id)
    }

    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE notifications SET is_read = 1, read_at = datetime('now')
                 WHERE recipient_id = ?1 AND is_read = 0",
                params![user_id],
            )
            .context("Failed to mark notifications read")
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count unread notifications")
    }

    pub fn delete_notification(&self, user_id: i64, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete notification")?;
        Ok(changed > 0)
    }

    /// Drop read notifications created before `before`.
    pub fn delete_read_notifications_before(&self, before: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM notifications WHERE is_read = 1 AND created_at < ?1",
                params![before],
            )
            .context("Failed to clean up notifications")
    }

    // ── Templates ─────────────────────────────────────────────────────

    pub fn upsert_notification_template(
        &self,
        name: &str,
        kind: NotificationType,
        title_template: &str,
        content_template: &str,
        icon: &str,
        priority: NotificationPriority,
    ) -> Result<NotificationTemplate> {
        self.conn
            .execute(
                "INSERT INTO notification_templates
                    (name, notification_type, title_template, content_template, icon, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    notification_type = excluded.notification_type,
                    title_template = excluded.title_template,
                    content_template = excluded.content_template,
                    icon = excluded.icon,
                    priority = excluded.priority",
                params![
                    name,
                    kind.as_str(),
                    title_template,
                    content_template,
                    icon,
                    priority.as_str(),
                ],
            )
            .context("Failed to upsert notification template")?;
        self.get_notification_template(name)?
            .context("Template not found after upsert")
    }

    pub fn get_notification_template(&self, name: &str) -> Result<Option<NotificationTemplate>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM notification_templates
                     WHERE name = ?1 AND is_active = 1"
                ),
                params![name],
                row_to_template,
            )
            .optional()
            .context("Failed to query notification template")
    }

    pub fn list_notification_templates(&self) -> Result<Vec<NotificationTemplate>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM notification_templates
                 WHERE is_active = 1 ORDER BY name"
            ))
            .context("Failed to prepare list_notification_templates")?;
        let rows = stmt
            .query_map([], row_to_template)
            .context("Failed to query notification templates")?;
        collect(rows, "notification template")
    }
}
