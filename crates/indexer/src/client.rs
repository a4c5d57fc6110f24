//! HTTP client for the indexer service
//!
//! Every call is a POST to `{host}{prefix}{endpoint}?apiKey=...`. A 2xx status
//! is success; anything else carries an [`ApiResponse`] error body.

use std::time::Duration;

use async_trait::async_trait;
use ingest::{Sink, SinkError};
use ingest_core::IndexerConfig;
use reqwest::{Response, Url};
use tracing::{debug, info, trace, warn};

use crate::{document::Document, response::ApiResponse};

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Invalid indexer URL {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("Indexer error {code} ({status}): {message}")]
  Api { status: u16, code: String, message: String },

  #[error("Indexer returned {status}: {body}")]
  Status { status: u16, body: String },
}

impl IndexerError {
  /// Whether the service answered at all
  pub fn is_unavailable(&self) -> bool {
    matches!(self, Self::Http(_) | Self::InvalidUrl { .. })
  }
}

#[derive(Debug, Clone)]
pub struct IndexerClient {
  client: reqwest::Client,
  host: String,
  path_prefix: String,
  api_key: String,
}

impl IndexerClient {
  pub fn new(config: &IndexerConfig) -> Result<Self, IndexerError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;

    Ok(Self {
      client,
      host: config.host.trim_end_matches('/').to_string(),
      path_prefix: config.path_prefix.clone(),
      api_key: config.api_key.clone(),
    })
  }

  /// Check the service is reachable and accepts the API key
  pub async fn ping(&self) -> Result<(), IndexerError> {
    let response = self.client.post(self.url("/ping")?).send().await?;
    check(response).await?;
    info!(host = %self.host, "Indexer reachable");
    Ok(())
  }

  pub async fn index(&self, document: &Document) -> Result<(), IndexerError> {
    debug!(source = %document.source, "Sending document to indexer");
    let response = self.client.post(self.url("/index")?).json(document).send().await?;
    check(response).await
  }

  fn url(&self, endpoint: &str) -> Result<Url, IndexerError> {
    let base = format!("{}{}{}", self.host, self.path_prefix, endpoint);
    Url::parse_with_params(&base, &[("apiKey", self.api_key.as_str())]).map_err(|e| IndexerError::InvalidUrl {
      url: base,
      reason: e.to_string(),
    })
  }
}

/// Map a response to success or a decoded error
async fn check(response: Response) -> Result<(), IndexerError> {
  let status = response.status();
  if status.is_success() {
    // Drain the body so the connection can be reused
    if let Err(e) = response.bytes().await {
      trace!(error = %e, "Failed to drain indexer response body");
    }
    return Ok(());
  }

  let body = response.text().await.unwrap_or_default();
  match serde_json::from_str::<ApiResponse>(&body) {
    Ok(ApiResponse { error: Some(error), .. }) => Err(IndexerError::Api {
      status: status.as_u16(),
      code: error.code,
      message: error.message,
    }),
    _ => {
      warn!(status = status.as_u16(), "Indexer error response without an error body");
      Err(IndexerError::Status {
        status: status.as_u16(),
        body,
      })
    }
  }
}

#[async_trait]
impl Sink<Document> for IndexerClient {
  async fn index(&self, record: &Document) -> Result<(), SinkError> {
    IndexerClient::index(self, record).await.map_err(|e| {
      if e.is_unavailable() {
        SinkError::Unavailable(e.to_string())
      } else {
        SinkError::Rejected(e.to_string())
      }
    })
  }
}
