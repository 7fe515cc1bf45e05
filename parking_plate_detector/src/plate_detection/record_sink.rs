use reqwest::blocking::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::PlateRecord;
use crate::config::StoreConfig;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot reach record store: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("record store rejected insert with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Durable destination for accepted plates. One call is one write attempt.
pub trait PersistenceSink {
    fn persist(&self, record: &PlateRecord) -> Result<(), PersistenceError>;
}

/// Inserts rows through the store's REST interface (`POST /rest/v1/<table>`).
pub struct RestRecordSink {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

pub fn table_endpoint(url: &str, table: &str) -> String {
    format!("{}/rest/v1/{}", url.trim_end_matches('/'), table)
}

impl RestRecordSink {
    pub fn new(config: &StoreConfig) -> Result<Self, PersistenceError> {
        let client = Client::builder()
            .timeout(config.request_timeout_secs.map(Duration::from_secs))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            endpoint: table_endpoint(&config.url, &config.table),
            api_key: config.api_key(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PersistenceSink for RestRecordSink {
    fn persist(&self, record: &PlateRecord) -> Result<(), PersistenceError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Prefer", "return=minimal")
            .json(record);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        debug!(endpoint = %self.endpoint, status = status.as_u16(), "record insert");
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().unwrap_or_default();
        Err(PersistenceError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
