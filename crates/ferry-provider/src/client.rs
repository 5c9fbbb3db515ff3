use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ProviderError;

/// JSON REST client shared by the provider adapters.
///
/// Holds the service root (e.g. `https://datastore.googleapis.com`) and an
/// optional bearer token attached to every request.
#[derive(Debug, Clone)]
pub struct ApiClient {
  http: Client,
  base_url: String,
  bearer_token: Option<String>,
}

impl ApiClient {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
    let http = Client::builder().timeout(timeout).build()?;
    Ok(Self {
      http,
      base_url: base_url.into().trim_end_matches('/').to_string(),
      bearer_token: None,
    })
  }

  pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
    self.bearer_token = token.filter(|t| !t.is_empty());
    self
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.bearer_token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
    let request = self.authorize(self.http.get(self.url(path)));
    let response = send(request).await?;
    decode(response).await
  }

  pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ProviderError>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let request = self.authorize(self.http.post(self.url(path)).json(body));
    let response = send(request).await?;
    decode(response).await
  }
}

async fn send(request: RequestBuilder) -> Result<Response, ProviderError> {
  let response = request.send().await?;
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(ProviderError::from_status(status, error_message(&body)))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
  let body = response.text().await?;
  serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Google APIs wrap failures as `{"error": {"message": ...}}`; fall back to the raw body.
fn error_message(body: &str) -> String {
  serde_json::from_str::<serde_json::Value>(body)
    .ok()
    .and_then(|v| {
      v.pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
    })
    .unwrap_or_else(|| body.to_string())
}
