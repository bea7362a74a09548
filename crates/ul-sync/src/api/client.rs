//! HTTP client for the Unified Listing API

use crate::api::{endpoints, types::*};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconcile::RecordWriter;
use crate::record::Record;
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// API client holding one session
///
/// Clones share the connection pool and the cookie jar, so a clone made
/// after [`ApiClient::login`] is logged in too.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.api_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Establish the session cookie used by every later call
    ///
    /// Anything but `200 OK` is an authentication failure.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = endpoints::login_url(&self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::auth(format!(
                "login as '{}' returned {}{}",
                username,
                status,
                if body.is_empty() { String::new() } else { format!(": {}", body) }
            )));
        }

        info!(username = %username, "Logged in to Unified Listing API");
        Ok(())
    }

    /// Fetch records matching `query`
    pub async fn fetch_products(&self, query: &ProductQuery) -> Result<Vec<Record>> {
        let url = endpoints::products_url(&self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&query.to_query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: ProductsResponse = response.json().await?;
        debug!(count = body.products.len(), sources = ?query.sources, "Fetched products");
        Ok(body.products)
    }

    /// `POST /api/product`
    pub async fn create_product(&self, record: &Record) -> Result<Record> {
        self.write_product(Method::POST, record).await
    }

    /// `PUT /api/product`
    pub async fn update_product(&self, record: &Record) -> Result<Record> {
        self.write_product(Method::PUT, record).await
    }

    async fn write_product(&self, method: Method, record: &Record) -> Result<Record> {
        let url = endpoints::product_url(&self.base_url);
        let response = self
            .client
            .request(method, &url)
            .json(record)
            .send()
            .await?;

        read_write_response(response, record).await
    }
}

/// Interpret a create/update response
///
/// On success the stored record comes back in the body; when the body is
/// empty or not an object the submitted record stands in for it.
async fn read_write_response(response: Response, submitted: &Record) -> Result<Record> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| Record::try_from(value).ok())
            .unwrap_or_else(|| submitted.clone()));
    }

    Err(write_error(status, body))
}

fn write_error(status: StatusCode, body: String) -> SyncError {
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => SyncError::Validation {
            status: status.as_u16(),
            message: parsed
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string()),
            errors: parsed.errors,
        },
        _ => SyncError::Api {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl RecordWriter for ApiClient {
    async fn create(&self, record: &Record) -> Result<Record> {
        self.create_product(record).await
    }

    async fn update(&self, record: &Record) -> Result<Record> {
        self.update_product(record).await
    }
}
