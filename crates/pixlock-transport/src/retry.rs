//! Fixed-backoff retry around individual transfer requests.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use pixlock_core::{UploadError, UploadResult};

/// Delays between attempts. The first attempt is immediate, so a request
/// is tried at most `RETRY_DELAYS.len() + 1` times.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Run `op`, retrying on errors that classify themselves as retryable.
/// Protocol violations and cancellation abort the loop immediately; waiting
/// out a backoff delay is itself interruptible by cancellation.
pub async fn with_retries<T, F, Fut>(
    operation: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> UploadResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = UploadResult<T>>,
{
    let mut delays = RETRY_DELAYS.iter();
    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match delays.next() {
                Some(delay) => {
                    tracing::warn!(
                        operation,
                        error = %e,
                        delay_secs = delay.as_secs(),
                        "Transfer failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(*delay) => {}
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    }
                }
                None => {
                    tracing::warn!(operation, error = %e, "Transfer failed, retries exhausted");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let cancel = CancellationToken::new();

        let result = with_retries("put", &cancel, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UploadError::Network("connection reset".to_string()))
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_all_delays() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let cancel = CancellationToken::new();

        let result: UploadResult<()> = with_retries("put", &cancel, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(UploadError::Network("still down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(UploadError::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), RETRY_DELAYS.len() + 1);
    }

    #[tokio::test]
    async fn protocol_violations_are_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let cancel = CancellationToken::new();

        let result: UploadResult<()> = with_retries("put", &cancel, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(UploadError::MissingEtag { part_number: 3 }) }
        })
        .await;

        assert!(matches!(result, Err(UploadError::MissingEtag { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: UploadResult<()> = with_retries("put", &cancel, || async {
            panic!("must not run after cancellation")
        })
        .await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_wait() {
        let cancel = CancellationToken::new();
        let inner = cancel.clone();
        let handle = tokio::spawn(async move {
            with_retries("put", &inner, || async {
                Err::<(), _>(UploadError::Network("down".to_string()))
            })
            .await
        });
        // Let the first attempt fail and enter the backoff sleep.
        tokio::task::yield_now().await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }
}
