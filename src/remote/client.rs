use crate::cache::{CacheItem, EntityType};
use crate::config::Config;
use crate::remote::types::{SubmissionUpdate, FORM_SUBMISSIONS};
use crate::remote::RemoteService;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// REST client for the hosted backend (PostgREST-style `/rest/v1/<table>` API).
#[derive(Clone)]
pub struct RestClient {
  http: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let url = config
      .backend
      .url
      .as_deref()
      .ok_or_else(|| eyre!("backend.url is not configured"))?;

    Self::with_base_url(url, api_key, config.sync.request_timeout())
  }

  pub fn with_base_url(url: &str, api_key: String, timeout: Option<Duration>) -> Result<Self> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid backend URL {}: {}", url, e))?;
    // Url::join replaces the last segment unless the path ends in '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let http = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      api_key,
    })
  }

  /// URL of a table endpoint
  pub fn table_url(&self, table: &str) -> Result<Url> {
    self
      .base
      .join(&format!("rest/v1/{}", table))
      .map_err(|e| eyre!("Failed to build URL for {}: {}", table, e))
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    self
      .http
      .request(method, url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .header("Prefer", "return=minimal")
  }

  /// Get every row of an entity table as cache items
  pub async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<CacheItem>> {
    let mut url = self.table_url(entity_type.table_name())?;
    url.query_pairs_mut().append_pair("select", "*");

    let response = self
      .request(reqwest::Method::GET, url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", entity_type, e))?;
    let response = check_status(response, &format!("fetch {}", entity_type)).await?;

    let rows: Vec<Value> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {} response: {}", entity_type, e))?;

    let items = rows
      .into_iter()
      .filter_map(|row| match row_to_item(row) {
        Some(item) => Some(item),
        None => {
          warn!(%entity_type, "Skipping row without an id");
          None
        }
      })
      .collect();

    Ok(items)
  }
}

/// Turn a table row into a cache item keyed by its `id` column.
fn row_to_item(row: Value) -> Option<CacheItem> {
  let id = match row.get("id")? {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    _ => return None,
  };
  let last_modified = row
    .get("updated_at")
    .and_then(Value::as_str)
    .map(String::from);

  Some(CacheItem {
    id,
    data: row,
    last_modified,
  })
}

/// Turn non-2xx responses into errors carrying the status and body.
async fn check_status(response: Response, action: &str) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(eyre!("Failed to {}: {} {}", action, status_label(status), body))
}

fn status_label(status: StatusCode) -> String {
  match status.canonical_reason() {
    Some(reason) => format!("{} {}", status.as_u16(), reason),
    None => status.as_u16().to_string(),
  }
}

impl RemoteService for RestClient {
  async fn update_submission(&self, id: &str, update: &SubmissionUpdate) -> Result<()> {
    let mut url = self.table_url(FORM_SUBMISSIONS)?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));

    let response = self
      .request(reqwest::Method::PATCH, url)
      .json(update)
      .send()
      .await
      .map_err(|e| eyre!("Failed to update submission {}: {}", id, e))?;
    check_status(response, &format!("update submission {}", id)).await?;

    debug!(id, "updated form submission");
    Ok(())
  }

  async fn insert_submission(&self, record: &Value) -> Result<()> {
    let url = self.table_url(FORM_SUBMISSIONS)?;

    let response = self
      .request(reqwest::Method::POST, url)
      .json(record)
      .send()
      .await
      .map_err(|e| eyre!("Failed to insert submission: {}", e))?;
    check_status(response, "insert submission").await?;

    debug!("inserted form submission");
    Ok(())
  }
}
