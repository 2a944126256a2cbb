use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::ClicksignConfig;

const PAGE_SIZE: usize = 50;
const CONCURRENT_PAGES: usize = 5;
// Hard stop for the pager; well above any realistic envelope count.
const MAX_PAGES: usize = 200;

/// Read-through client for the Clicksign envelope API (v3).
#[derive(Debug, Clone)]
pub struct ClicksignClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub enum ClicksignError {
    Api { status: u16, body: String },
    Network(String),
    Parse(String),
}

impl std::fmt::Display for ClicksignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api { status, body } => write!(f, "Clicksign API error {status}: {body}"),
            Self::Network(e) => write!(f, "Network error: {e}"),
            Self::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for ClicksignError {}

/// Normalized envelope record; the only fields reconciliation needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub key: String,
    pub name: String,
    pub status: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Deserialize)]
struct EnvelopeListResponse {
    data: Vec<RawEnvelope>,
}

#[derive(Deserialize)]
struct EnvelopeResponse {
    data: RawEnvelope,
}

#[derive(Deserialize)]
struct RawEnvelope {
    id: String,
    attributes: RawEnvelopeAttributes,
}

#[derive(Deserialize)]
struct RawEnvelopeAttributes {
    name: Option<String>,
    status: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl From<RawEnvelope> for Envelope {
    fn from(raw: RawEnvelope) -> Self {
        Envelope {
            key: raw.id,
            name: raw.attributes.name.unwrap_or_default(),
            status: raw.attributes.status.unwrap_or_default(),
            created_at: raw.attributes.created_at,
            updated_at: raw.attributes.updated_at,
        }
    }
}

impl ClicksignClient {
    pub fn new(config: ClicksignConfig) -> Self {
        Self {
            access_token: config.access_token,
            base_url: config.base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Pages through the full envelope listing, fetching up to five pages
    /// concurrently per round, until a page comes back short.
    pub async fn fetch_all_envelopes(&self) -> Result<Vec<Envelope>, ClicksignError> {
        let mut envelopes = Vec::new();
        let mut page = 1usize;

        loop {
            let round: Vec<usize> = (page..page + CONCURRENT_PAGES)
                .filter(|p| *p <= MAX_PAGES)
                .collect();
            if round.is_empty() {
                warn!("Envelope pager hit the page cap at {MAX_PAGES}");
                break;
            }

            let fetches = round.iter().map(|p| self.fetch_envelope_page(*p));
            let results = join_all(fetches).await;

            let mut exhausted = false;
            for result in results {
                let batch = result?;
                if batch.len() < PAGE_SIZE {
                    exhausted = true;
                }
                envelopes.extend(batch);
            }

            if exhausted {
                break;
            }
            page += CONCURRENT_PAGES;
        }

        debug!("Fetched {} envelopes", envelopes.len());
        Ok(envelopes)
    }

    async fn fetch_envelope_page(&self, page: usize) -> Result<Vec<Envelope>, ClicksignError> {
        let response = self
            .client
            .get(format!("{}/envelopes", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[
                ("page[number]", page.to_string()),
                ("page[size]", PAGE_SIZE.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ClicksignError::Network(e.to_string()))?;

        let list: EnvelopeListResponse = self.handle_response(response).await?;
        Ok(list.data.into_iter().map(Envelope::from).collect())
    }

    /// Fallback lookup for a single envelope by key; the listing pager is
    /// the primary path.
    pub async fn get_envelope(&self, key: &str) -> Result<Envelope, ClicksignError> {
        let response = self
            .client
            .get(format!("{}/envelopes/{key}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ClicksignError::Network(e.to_string()))?;

        let envelope: EnvelopeResponse = self.handle_response(response).await?;
        Ok(envelope.data.into())
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClicksignError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClicksignError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ClicksignError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ClicksignError::Parse(e.to_string()))
    }
}
