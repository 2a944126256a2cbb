//! User-facing notification records written when a contract transition
//! actually changes state. Insert-only; the notification center reads them
//! elsewhere.

use chrono::Utc;
use diesel::prelude::*;
use log::debug;
use uuid::Uuid;

use crate::lifecycle::OVERDUE_FREEZE_THRESHOLD;
use crate::shared::models::Notification;
use crate::shared::schema::notifications;

pub fn notify(
    conn: &mut PgConnection,
    user_id: Uuid,
    title: &str,
    message: &str,
    notification_type: &str,
    link: Option<String>,
) -> QueryResult<()> {
    let record = Notification {
        id: Uuid::new_v4(),
        user_id,
        title: title.to_string(),
        message: message.to_string(),
        notification_type: notification_type.to_string(),
        link,
        read: false,
        created_at: Utc::now(),
    };
    diesel::insert_into(notifications::table)
        .values(&record)
        .execute(conn)?;
    Ok(())
}

/// Notifies the contract owner if there is one; contracts without an owner
/// just log.
pub fn notify_owner(
    conn: &mut PgConnection,
    owner_id: Option<Uuid>,
    contract_id: Uuid,
    title: &str,
    message: &str,
    notification_type: &str,
) -> QueryResult<()> {
    match owner_id {
        Some(user_id) => notify(
            conn,
            user_id,
            title,
            message,
            notification_type,
            Some(format!("/contracts/{contract_id}")),
        ),
        None => {
            debug!("Contract {contract_id} has no owner, skipping notification: {title}");
            Ok(())
        }
    }
}

/// Installment progress suffix, e.g. "4/12", when the event carried both
/// numbers.
fn installment_progress(paid: Option<i32>, total: Option<i32>) -> Option<String> {
    match (paid, total) {
        (Some(paid), Some(total)) if total > 0 => Some(format!("{paid}/{total}")),
        _ => None,
    }
}

/// Title/message for a billing webhook event, or `None` for event types
/// that do not warrant a user-facing notification.
pub fn billing_event_notification(
    event_type: &str,
    contact_name: &str,
    paid_installment: Option<i32>,
    total_installments: Option<i32>,
) -> Option<(String, String)> {
    let progress = installment_progress(paid_installment, total_installments);

    match event_type {
        "bill_paid" | "charge_paid" => {
            let message = match progress {
                Some(progress) => {
                    format!("Payment received for {contact_name}: installment {progress}.")
                }
                None => format!("Payment received for {contact_name}."),
            };
            Some(("Payment received".to_string(), message))
        }
        "charge_rejected" => Some((
            "Payment rejected".to_string(),
            format!("A charge for {contact_name} was rejected by the billing provider."),
        )),
        "charge_refunded" => Some((
            "Payment refunded".to_string(),
            format!("A charge for {contact_name} was refunded."),
        )),
        "bill_canceled" => Some((
            "Bill cancelled".to_string(),
            format!("A bill for {contact_name} was cancelled."),
        )),
        "subscription_canceled" => Some((
            "Subscription cancelled".to_string(),
            format!("The billing subscription for {contact_name} was cancelled."),
        )),
        "subscription_activated" | "subscription_reactivated" => Some((
            "Subscription active".to_string(),
            format!("The billing subscription for {contact_name} is active."),
        )),
        _ => None,
    }
}

/// Title/message for a signature webhook event that changed the contract
/// lifecycle.
pub fn signature_event_notification(event_name: &str, contact_name: &str) -> Option<(String, String)> {
    match event_name {
        "sign" | "auto_close" => Some((
            "Contract signed".to_string(),
            format!("The contract for {contact_name} was signed by all parties."),
        )),
        "cancel" => Some((
            "Contract cancelled".to_string(),
            format!("The signature envelope for {contact_name} was cancelled."),
        )),
        "refuse" => Some((
            "Signature refused".to_string(),
            format!("A signer refused the contract for {contact_name}."),
        )),
        "deadline" => Some((
            "Signature expired".to_string(),
            format!("The signature envelope for {contact_name} expired."),
        )),
        _ => None,
    }
}

pub fn freeze_notification(contact_name: &str, overdue_count: usize) -> (String, String) {
    (
        "Contract frozen".to_string(),
        format!(
            "Contract for {contact_name} was frozen: {overdue_count} overdue bills (threshold {OVERDUE_FREEZE_THRESHOLD})."
        ),
    )
}

pub fn unfreeze_notification(contact_name: &str, overdue_count: usize) -> (String, String) {
    (
        "Contract reactivated".to_string(),
        format!(
            "Contract for {contact_name} is active again: {overdue_count} overdue bills, below the freeze threshold."
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_paid_message_carries_installment_progress() {
        let (title, message) =
            billing_event_notification("charge_paid", "Maria Souza", Some(4), Some(12)).unwrap();
        assert_eq!(title, "Payment received");
        assert!(message.contains("4/12"), "{message}");
    }

    #[test]
    fn payment_without_installments_still_notifies() {
        let (_, message) =
            billing_event_notification("bill_paid", "Maria Souza", None, None).unwrap();
        assert!(!message.contains('/'));
    }

    #[test]
    fn bookkeeping_events_do_not_notify() {
        assert!(billing_event_notification("bill_created", "Maria", None, None).is_none());
        assert!(billing_event_notification("payment_profile_created", "Maria", None, None).is_none());
    }

    #[test]
    fn zero_total_installments_is_ignored() {
        let (_, message) =
            billing_event_notification("charge_paid", "Maria", Some(1), Some(0)).unwrap();
        assert!(!message.contains("1/0"));
    }

    #[test]
    fn signature_events_have_templates() {
        for event in ["sign", "auto_close", "cancel", "refuse", "deadline"] {
            assert!(signature_event_notification(event, "Maria").is_some(), "{event}");
        }
        assert!(signature_event_notification("open", "Maria").is_none());
    }
}
