use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::VindiConfig;

/// Read-through client for the Vindi billing API. Authentication is HTTP
/// Basic with the API key as username and an empty password.
#[derive(Debug, Clone)]
pub struct VindiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub enum VindiError {
    Api { status: u16, body: String },
    Network(String),
    Parse(String),
}

impl std::fmt::Display for VindiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api { status, body } => write!(f, "Vindi API error {status}: {body}"),
            Self::Network(e) => write!(f, "Network error: {e}"),
            Self::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for VindiError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VindiCustomer {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub registry_code: Option<String>,
    pub phones: Option<Vec<VindiPhone>>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VindiPhone {
    pub number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VindiSubscription {
    pub id: i64,
    pub status: String,
    pub customer: Option<VindiRef>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VindiBill {
    pub id: i64,
    pub status: String,
    pub due_at: Option<String>,
    pub created_at: Option<String>,
    pub installments: Option<i32>,
    pub subscription: Option<VindiRef>,
    pub customer: Option<VindiRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VindiRef {
    pub id: i64,
}

/// Customer attribute a search call filters on. Each field is a separate
/// request against the API; the matcher tries them in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerSearchField {
    Email,
    RegistryCode,
    Name,
    Phone,
}

impl CustomerSearchField {
    pub fn query_key(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::RegistryCode => "registry_code",
            Self::Name => "name",
            Self::Phone => "phone",
        }
    }
}

#[derive(Deserialize)]
struct CustomerList {
    customers: Vec<VindiCustomer>,
}

#[derive(Deserialize)]
struct SubscriptionList {
    subscriptions: Vec<VindiSubscription>,
}

#[derive(Deserialize)]
struct BillList {
    bills: Vec<VindiBill>,
}

#[derive(Deserialize)]
struct SubscriptionEnvelope {
    subscription: VindiSubscription,
}

#[derive(Deserialize)]
struct BillEnvelope {
    bill: VindiBill,
}

impl VindiClient {
    pub fn new(config: VindiConfig) -> Self {
        Self {
            api_key: config.api_key,
            base_url: config.base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn search_customers(
        &self,
        field: CustomerSearchField,
        value: &str,
    ) -> Result<Vec<VindiCustomer>, VindiError> {
        let query = format!("{}={}", field.query_key(), value);
        debug!("Vindi customer search: {query}");

        let response = self
            .client
            .get(format!("{}/customers", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("query", query.as_str())])
            .send()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        let list: CustomerList = self.handle_response(response).await?;
        Ok(list.customers)
    }

    /// Subscriptions for a customer, most recent first.
    pub async fn list_subscriptions(
        &self,
        customer_id: i64,
    ) -> Result<Vec<VindiSubscription>, VindiError> {
        let response = self
            .client
            .get(format!("{}/subscriptions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[
                ("query", format!("customer_id={customer_id}")),
                ("sort_by", "created_at".to_string()),
                ("sort_order", "desc".to_string()),
            ])
            .send()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        let list: SubscriptionList = self.handle_response(response).await?;
        Ok(list.subscriptions)
    }

    /// Preferred linkage target: an active subscription, else the most
    /// recent one of any status, else none.
    pub async fn find_subscription(
        &self,
        customer_id: i64,
    ) -> Result<Option<VindiSubscription>, VindiError> {
        let subscriptions = self.list_subscriptions(customer_id).await?;
        let active = subscriptions.iter().find(|s| s.status == "active").cloned();
        Ok(active.or_else(|| subscriptions.into_iter().next()))
    }

    pub async fn find_latest_bill(&self, customer_id: i64) -> Result<Option<VindiBill>, VindiError> {
        let response = self
            .client
            .get(format!("{}/bills", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[
                ("query", format!("customer_id={customer_id}")),
                ("sort_by", "created_at".to_string()),
                ("sort_order", "desc".to_string()),
                ("per_page", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        let list: BillList = self.handle_response(response).await?;
        Ok(list.bills.into_iter().next())
    }

    /// Bills of a subscription, optionally narrowed to one status
    /// (e.g. "pending" for the overdue count).
    pub async fn list_bills(
        &self,
        subscription_id: i64,
        status: Option<&str>,
    ) -> Result<Vec<VindiBill>, VindiError> {
        let mut query = format!("subscription_id={subscription_id}");
        if let Some(status) = status {
            query.push_str(&format!(" status={status}"));
        }

        let response = self
            .client
            .get(format!("{}/bills", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("query", query.as_str())])
            .send()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        let list: BillList = self.handle_response(response).await?;
        Ok(list.bills)
    }

    pub async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<VindiSubscription, VindiError> {
        let response = self
            .client
            .get(format!("{}/subscriptions/{subscription_id}", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        let envelope: SubscriptionEnvelope = self.handle_response(response).await?;
        Ok(envelope.subscription)
    }

    pub async fn get_bill(&self, bill_id: i64) -> Result<VindiBill, VindiError> {
        let response = self
            .client
            .get(format!("{}/bills/{bill_id}", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        let envelope: BillEnvelope = self.handle_response(response).await?;
        Ok(envelope.bill)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, VindiError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VindiError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(VindiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| VindiError::Parse(e.to_string()))
    }
}
