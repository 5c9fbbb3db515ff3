//! Loads triggered by "object written" notifications from object storage.
//!
//! Notifications arrive as push deliveries from a pub/sub subscription. The
//! message data is the base64 JSON resource of the written object. Only the
//! per-kind `.export_metadata` files of a workflow's export start a load.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ferry_config::LoadTrigger;
use ferry_store::JobStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::OrchestratorError;
use crate::Orchestrator;

const METADATA_SUFFIX: &str = ".export_metadata";
const KIND_MARKERS: [&str; 2] = ["/default_namespace_kind_", "/all_namespaces_kind_"];

/// A pub/sub push delivery.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
  message: PushMessage,
  #[serde(default)]
  subscription: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
  #[serde(default)]
  data: String,
  #[serde(default)]
  message_id: String,
}

/// The object named by a storage notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageObject {
  pub bucket: String,
  pub name: String,
}

impl StorageObject {
  /// Decode the object resource carried by a push delivery body.
  pub fn from_push(body: &[u8]) -> Result<Self, OrchestratorError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
      .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid push envelope: {e}")))?;
    let data = STANDARD
      .decode(envelope.message.data.as_bytes())
      .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid message data: {e}")))?;
    let object: StorageObject = serde_json::from_slice(&data)
      .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid storage object: {e}")))?;

    debug!(
      subscription = %envelope.subscription,
      message_id = %envelope.message.message_id,
      object = %object.name,
      "storage notification decoded"
    );
    Ok(object)
  }

  pub fn uri(&self) -> String {
    format!("gs://{}/{}", self.bucket, self.name)
  }
}

/// Kind whose export metadata file `name` is, if it is one.
pub fn kind_from_object(name: &str) -> Option<String> {
  let stem = name.strip_suffix(METADATA_SUFFIX)?;
  KIND_MARKERS.iter().find_map(|marker| {
    let start = stem.rfind(marker)? + marker.len();
    let kind = &stem[start..];
    (!kind.is_empty() && !kind.contains('/')).then(|| kind.to_string())
  })
}

/// The workflow ID in an object path: the first segment that is a UUID.
pub fn workflow_id_from_object(name: &str) -> Option<String> {
  name
    .split('/')
    .find(|segment| uuid::Uuid::parse_str(segment).is_ok())
    .map(str::to_string)
}

/// What a storage notification led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
  /// The object does not start a load.
  Ignored { reason: String },
  /// A load was submitted (`accepted`) or refused by the provider.
  Started {
    workflow_id: String,
    kind: String,
    accepted: bool,
  },
  /// The load of this kind was already started by an earlier notification.
  AlreadyStarted { workflow_id: String, kind: String },
}

fn ignored(reason: impl Into<String>) -> NotificationOutcome {
  NotificationOutcome::Ignored {
    reason: reason.into(),
  }
}

impl Orchestrator {
  /// Start the load of the kind whose export file `object` is.
  #[instrument(name = "storage_notification", skip(self), fields(object = %object.name))]
  pub async fn handle_storage_notification(
    &self,
    object: &StorageObject,
  ) -> Result<NotificationOutcome, OrchestratorError> {
    if self.settings.load_trigger != LoadTrigger::StorageNotification {
      return Ok(ignored("loads are triggered by export completion"));
    }
    let Some(kind) = kind_from_object(&object.name) else {
      return Ok(ignored("not an export metadata file"));
    };
    let Some(workflow_id) = workflow_id_from_object(&object.name) else {
      return Ok(ignored("no workflow id in object path"));
    };

    let load = match self.deps.store.get_load(&workflow_id, &kind).await {
      Ok(load) => load,
      Err(ferry_store::Error::NotFound(_)) => {
        debug!(workflow_id = %workflow_id, kind = %kind, "no load record for exported kind");
        return Ok(ignored("kind is not loaded by this workflow"));
      }
      Err(e) => return Err(e.into()),
    };
    if load.status != JobStatus::Created {
      info!(workflow_id = %workflow_id, kind = %kind, status = ?load.status, "load_already_started");
      return Ok(NotificationOutcome::AlreadyStarted { workflow_id, kind });
    }

    let accepted = self.start_load(&load, &object.uri()).await?;
    Ok(NotificationOutcome::Started {
      workflow_id,
      kind,
      accepted,
    })
  }
}
