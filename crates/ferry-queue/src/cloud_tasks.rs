use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{QueueError, Task, TaskQueue};

/// Extra attempts made when the queue service answers 503.
const MAX_UNAVAILABLE_RETRIES: u32 = 5;

/// Settings for [`CloudTasksQueue`].
#[derive(Debug, Clone)]
pub struct CloudTasksConfig {
  /// Service root, `https://cloudtasks.googleapis.com` in production.
  pub api_base_url: String,
  /// Full queue name: `projects/{project}/locations/{location}/queues/{queue}`.
  pub queue: String,
  /// Identity the queue signs its OIDC token with when delivering.
  pub service_account_email: Option<String>,
  /// Bearer token for calls to the queue service itself.
  pub bearer_token: Option<String>,
  pub timeout: Duration,
  /// Base wait between attempts after a 503.
  pub retry_delay: Duration,
}

/// Task queue backed by managed HTTP tasks.
#[derive(Debug, Clone)]
pub struct CloudTasksQueue {
  http: Client,
  config: CloudTasksConfig,
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest {
  task: TaskResource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskResource {
  http_request: HttpRequest,
  #[serde(skip_serializing_if = "Option::is_none")]
  schedule_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
  url: String,
  http_method: &'static str,
  headers: serde_json::Value,
  /// Base64 of the JSON payload.
  body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  oidc_token: Option<OidcToken>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcToken {
  service_account_email: String,
}

impl CloudTasksQueue {
  pub fn new(config: CloudTasksConfig) -> Result<Self, QueueError> {
    let http = Client::builder().timeout(config.timeout).build()?;
    Ok(Self { http, config })
  }

  fn create_request(&self, task: &Task) -> Result<CreateTaskRequest, QueueError> {
    let payload = serde_json::to_vec(&task.body)?;
    let schedule_time = (!task.delay.is_zero())
      .then(|| chrono::Duration::from_std(task.delay).ok())
      .flatten()
      .map(|delay| (Utc::now() + delay).to_rfc3339_opts(SecondsFormat::Secs, true));

    Ok(CreateTaskRequest {
      task: TaskResource {
        http_request: HttpRequest {
          url: task.url.clone(),
          http_method: "POST",
          headers: serde_json::json!({ "Content-Type": "application/json" }),
          body: STANDARD.encode(payload),
          oidc_token: self
            .config
            .service_account_email
            .clone()
            .map(|service_account_email| OidcToken { service_account_email }),
        },
        schedule_time,
      },
    })
  }

  fn tasks_url(&self) -> String {
    format!(
      "{}/v2/{}/tasks",
      self.config.api_base_url.trim_end_matches('/'),
      self.config.queue
    )
  }
}

#[async_trait]
impl TaskQueue for CloudTasksQueue {
  async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
    let body = self.create_request(&task)?;
    let url = self.tasks_url();
    let mut retries = 0;

    loop {
      let mut request = self.http.post(&url).json(&body);
      if let Some(token) = &self.config.bearer_token {
        request = request.bearer_auth(token);
      }
      let response = request.send().await?;
      let status = response.status();

      if status.is_success() {
        debug!(url = %task.url, delay_ms = task.delay.as_millis() as u64, "task created");
        return Ok(());
      }

      let message = response.text().await.unwrap_or_default();
      if status != StatusCode::SERVICE_UNAVAILABLE {
        return Err(QueueError::Rejected {
          status: status.as_u16(),
          message,
        });
      }
      if retries >= MAX_UNAVAILABLE_RETRIES {
        return Err(QueueError::Unavailable {
          status: status.as_u16(),
          message,
        });
      }

      retries += 1;
      warn!(url = %task.url, retries, "task queue unavailable, retrying");
      tokio::time::sleep(self.config.retry_delay * retries).await;
    }
  }
}
