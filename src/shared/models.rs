use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::schema::{contacts, contract_cancellations, contracts, notifications};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = contacts)]
pub struct Contact {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub registry_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Central entity of the reconciliation subsystem. Provider linkage fields
/// are nullable and acquired progressively after the contract is created;
/// `status` is the business lifecycle while `billing_status` and
/// `signature_status` mirror remote provider state.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = contracts)]
pub struct Contract {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub product_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub status: String,
    pub vindi_customer_id: Option<String>,
    pub vindi_subscription_id: Option<String>,
    pub vindi_bill_id: Option<String>,
    pub clicksign_document_key: Option<String>,
    pub billing_status: String,
    pub signature_status: String,
    pub paid_installments: Option<i32>,
    pub total_installments: Option<i32>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for a contract row. `None` fields are left untouched,
/// so every write is a single-row, single-statement set of exactly the
/// fields a transition produced.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = contracts)]
pub struct ContractUpdate {
    pub status: Option<String>,
    pub vindi_customer_id: Option<String>,
    pub vindi_subscription_id: Option<String>,
    pub vindi_bill_id: Option<String>,
    pub clicksign_document_key: Option<String>,
    pub billing_status: Option<String>,
    pub signature_status: Option<String>,
    pub paid_installments: Option<i32>,
    pub total_installments: Option<i32>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContractUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.vindi_customer_id.is_none()
            && self.vindi_subscription_id.is_none()
            && self.vindi_bill_id.is_none()
            && self.clicksign_document_key.is_none()
            && self.billing_status.is_none()
            && self.signature_status.is_none()
            && self.paid_installments.is_none()
            && self.total_installments.is_none()
            && self.last_payment_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = contract_cancellations)]
pub struct ContractCancellation {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub details: Option<String>,
    pub contract_month: Option<i32>,
    pub meetings_completed: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
