use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::Error;

/// Immediate retries of a transaction that failed with a transient error.
pub(crate) const MAX_TRANSIENT_RETRIES: u32 = 5;

const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Run `op` again while it fails with a transient error, at most
/// [`MAX_TRANSIENT_RETRIES`] extra times.
pub(crate) async fn with_transient_retry<T, F, Fut>(operation: &str, mut op: F) -> Result<T, Error>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, Error>>,
{
  let mut retries = 0;
  loop {
    match op().await {
      Err(e) if e.is_transient() && retries < MAX_TRANSIENT_RETRIES => {
        retries += 1;
        warn!(operation, retries, error = %e, "transient store error, retrying");
        tokio::time::sleep(RETRY_DELAY * retries).await;
      }
      result => return result,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  fn transient() -> Error {
    Error::Database(sqlx::Error::PoolTimedOut)
  }

  #[tokio::test]
  async fn test_retries_transient_then_succeeds() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result = with_transient_retry("test", move || async move {
      if counter.fetch_add(1, Ordering::SeqCst) < 2 {
        Err(transient())
      } else {
        Ok(7)
      }
    })
    .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_gives_up_after_ceiling() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result: Result<(), Error> = with_transient_retry("test", move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Err(transient())
    })
    .await;

    assert!(result.unwrap_err().is_transient());
    assert_eq!(calls.load(Ordering::SeqCst), MAX_TRANSIENT_RETRIES + 1);
  }

  #[tokio::test]
  async fn test_not_found_is_not_retried() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result: Result<(), Error> = with_transient_retry("test", move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Err(Error::NotFound("wf".to_string()))
    })
    .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
