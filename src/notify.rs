//! Notification delivery: persist the row, then push it to the recipient's
//! sockets when they have notifications enabled.

use anyhow::{Context, Result};

use crate::db::EcoDb;
use crate::models::{NewNotification, Notification, NotificationTemplate};
use crate::ws::{self, WsEvent, WsSender};

pub fn notify(db: &EcoDb, tx: &WsSender, new: NewNotification) -> Result<Notification> {
    let recipient = db
        .get_user(new.recipient_id)?
        .with_context(|| format!("Notification recipient {} does not exist", new.recipient_id))?;
    let notification = db.create_notification(&new)?;
    if recipient.notifications_enabled {
        ws::send_to_user(tx, recipient.id, &WsEvent::from_notification(&notification));
    }
    tracing::debug!(
        user_id = recipient.id,
        notification_id = notification.id,
        kind = %notification.notification_type,
        "notification created"
    );
    Ok(notification)
}

/// Notify using the named template when it exists and is active, otherwise
/// send `fallback` as given.
pub fn notify_templated(
    db: &EcoDb,
    tx: &WsSender,
    template_name: &str,
    values: &[(&str, String)],
    fallback: NewNotification,
) -> Result<Notification> {
    let new = match db.get_notification_template(template_name)? {
        Some(template) => from_template(&template, fallback.recipient_id, values)
            .action_url(fallback.action_url)
            .reference_opt(fallback.reference_id),
        None => fallback,
    };
    notify(db, tx, new)
}

pub fn from_template(
    template: &NotificationTemplate,
    recipient_id: i64,
    values: &[(&str, String)],
) -> NewNotification {
    NewNotification::new(
        recipient_id,
        template.notification_type,
        render(&template.title_template, values),
        render(&template.content_template, values),
    )
    .priority(template.priority)
    .icon(template.icon.clone())
}

/// Substitute `{key}` placeholders. Unknown placeholders and unmatched
/// braces are kept verbatim; substituted values are not re-scanned.
pub fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
