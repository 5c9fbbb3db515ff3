//! Export-to-load workflow orchestration for ferry.
//!
//! A workflow is one export of a batch of kinds followed by one load per
//! kind. Nothing runs in the background: every step is a request handled by
//! [`Orchestrator`], and every "check again later" is a task on the queue.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//! ├── start_export(request)          create records, call the export provider
//! ├── check_export(callback)         poll; retry on failure, fan out on done
//! │   └── start_loads(workflow_id)   one load job per Created load record
//! ├── check_load(callback)           poll; fan-in check on terminal status
//! └── handle_storage_notification    start one load per written export file
//! ```
//!
//! Every mutation is a single-key transition in the [`Store`], so duplicate
//! and concurrent deliveries of the same callback are harmless.

mod error;
mod export;
mod load;
mod notification;
mod scheduler;
mod workflow;

pub use error::{ErrorKind, OrchestratorError};
pub use export::ExportCheckOutcome;
pub use load::{LoadCheckOutcome, load_job_id, source_uri};
pub use notification::{NotificationOutcome, StorageObject, kind_from_object, workflow_id_from_object};
pub use scheduler::{Next, Scheduler};
pub use workflow::{WorkflowState, WorkflowSummary};

use std::sync::Arc;

use ferry_config::Settings;
use ferry_provider::{ExportProvider, KindCatalog, LoadProvider};
use ferry_queue::TaskQueue;
use ferry_store::Store;

/// External collaborators, built once at process start.
#[derive(Clone)]
pub struct Dependencies {
  pub store: Arc<dyn Store>,
  pub exports: Arc<dyn ExportProvider>,
  pub kinds: Arc<dyn KindCatalog>,
  pub loads: Arc<dyn LoadProvider>,
  pub queue: Arc<dyn TaskQueue>,
}

/// Drives workflows through their export and load phases.
pub struct Orchestrator {
  pub(crate) deps: Dependencies,
  pub(crate) settings: Settings,
  pub(crate) scheduler: Scheduler,
}

impl Orchestrator {
  pub fn new(deps: Dependencies, settings: Settings) -> Self {
    let scheduler = Scheduler::new(deps.queue.clone(), &settings);
    Self {
      deps,
      settings,
      scheduler,
    }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.deps.store
  }
}
