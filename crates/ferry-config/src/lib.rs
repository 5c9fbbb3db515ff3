//! Ferry Config
//!
//! This crate contains the serializable types shared by every ferry crate:
//!
//! - the inbound request that starts an export-to-load workflow and its
//!   response ([`ExportRequest`], [`ExportResponse`])
//! - the JSON payloads carried by queue callbacks ([`ExportCheckRequest`],
//!   [`LoadCheckRequest`])
//! - process-wide [`Settings`] that tune batching, retry ceilings and the
//!   polling cadence
//!
//! Nothing here performs I/O. The binary builds [`Settings`] from its command
//! line and hands it to the orchestrator.

mod callback;
mod request;
mod settings;

pub use callback::{EXPORT_CHECK_PATH, ExportCheckRequest, LOAD_CHECK_PATH, LoadCheckRequest};
pub use request::{ExportRequest, ExportResponse, WorkflowIds};
pub use settings::{Backoff, LoadTrigger, Settings};
