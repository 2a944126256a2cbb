//! Batch reconciliation passes over local contracts against remote
//! provider state. All sweeps are paginated or bounded so they fit inside
//! short-lived invocations and can be resumed by re-triggering.

pub mod batch;
pub mod cancellation;
pub mod frozen;
pub mod linkage;

use chrono::{DateTime, Utc};

use crate::billing::vindi::VindiBill;
use crate::lifecycle::{billing_snapshot, BillView, BillingSnapshot};

/// Ladder evaluation against the current wall clock.
pub fn billing_snapshot_for(subscription_status: &str, views: &[BillView]) -> BillingSnapshot {
    billing_snapshot(subscription_status, views, Utc::now())
}

pub fn parse_iso(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn to_bill_views(bills: &[VindiBill]) -> Vec<BillView> {
    bills
        .iter()
        .map(|b| BillView {
            status: b.status.clone(),
            due_at: parse_iso(b.due_at.as_deref()),
        })
        .collect()
}
