use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::ExportError;
use crate::model::{ApiResponse, ProductsResponse, Record};

/// Where the pipeline gets its records from.
#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Record>, ExportError>;
}

/// Reads the product listing from the catalog service over HTTP.
#[derive(Clone)]
pub struct HttpProductSource {
    http: Client,
    products_url: Url,
}

impl fmt::Debug for HttpProductSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProductSource")
            .field("products_url", &self.products_url)
            .finish_non_exhaustive()
    }
}

impl HttpProductSource {
    pub fn new(products_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("merchant-feed/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http, products_url })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let url = Url::parse(&cfg.source.products_url)?;
        Ok(Self::new(url, cfg.source_timeout())?)
    }

    pub fn build_request(&self) -> Result<reqwest::Request, reqwest::Error> {
        self.http
            .get(self.products_url.clone())
            .header("Accept", "application/json")
            .build()
    }
}

#[async_trait]
impl ProductSource for HttpProductSource {
    async fn fetch(&self) -> Result<Vec<Record>, ExportError> {
        let request = self
            .build_request()
            .map_err(|e| ExportError::SourceUnavailable(e.to_string()))?;
        debug!(url = %request.url(), "fetching products");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| ExportError::SourceUnavailable(format!("failed to reach catalog: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ExportError::SourceUnavailable(format!(
                "catalog error {status}: {body}"
            )));
        }

        let envelope: ApiResponse<ProductsResponse> = res
            .json()
            .await
            .map_err(|e| ExportError::SourceUnavailable(format!("invalid catalog response: {e}")))?;
        unwrap_envelope(envelope)
    }
}

/// Accept only `{success: true, data: {...}}`.
pub fn unwrap_envelope(envelope: ApiResponse<ProductsResponse>) -> Result<Vec<Record>, ExportError> {
    match envelope {
        ApiResponse {
            success: true,
            data: Some(products),
            ..
        } => Ok(products.data),
        ApiResponse { error, .. } => Err(ExportError::SourceUnavailable(
            error.unwrap_or_else(|| "Failed to fetch products".to_string()),
        )),
    }
}
