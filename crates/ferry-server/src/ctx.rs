//! Service context

use std::sync::Arc;

use ferry_orchestrator::Orchestrator;

/// State shared by every handler.
#[derive(Clone)]
pub struct Ctx {
  pub orchestrator: Arc<Orchestrator>,
}
