pub mod checks;
pub mod export;
pub mod notify;
pub mod workflows;

/// Health check handler
pub async fn health() -> &'static str {
  "OK"
}
