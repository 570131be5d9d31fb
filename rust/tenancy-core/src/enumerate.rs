//! Retried reads and paginated enumerations.

use std::future::Future;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::Stream;

use crate::{BackendError, Page};

/// Retry schedule for idempotent reads.
///
/// Only [`BackendError::Unavailable`] is retried. Mutations never go through
/// this type: repeating a create or delete whose first attempt may already
/// have landed would turn a real failure into a misleading `AlreadyExists`
/// or `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub attempts: u32,
    /// Delay before the second attempt, doubled for each further attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Try once, never retry.
    pub fn never() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt + 1`.
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run the read produced by `operation`, retrying transient failures.
    pub async fn read<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(error) if error.is_transient() && attempt < self.attempts => {
                    let backoff = self.delay(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        attempts = self.attempts,
                        ?backoff,
                        %error,
                        "retrying read"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Lazily walk every page of an enumeration.
///
/// `fetch` receives the continuation marker of the page to load (`None` for
/// the first page). Each page load is retried according to `retry`. The
/// stream can be dropped at any point and restarted by calling this function
/// again.
pub fn paginate<'a, T, F, Fut>(
    retry: RetryPolicy,
    what: &'a str,
    mut fetch: F,
) -> impl Stream<Item = Result<T, BackendError>> + 'a
where
    T: 'a,
    F: FnMut(Option<String>) -> Fut + 'a,
    Fut: Future<Output = Result<Page<T>, BackendError>> + 'a,
{
    try_stream! {
        let mut marker: Option<String> = None;
        loop {
            let page = retry.read(what, || fetch(marker.clone())).await?;
            for item in page.items {
                yield item;
            }
            match page.next {
                Some(next) if Some(&next) == marker.as_ref() => {
                    Err::<(), _>(BackendError::Rejected {
                        code: "PaginationLoop".into(),
                        message: format!("{what} listing returned marker `{next}` twice"),
                    })?;
                }
                Some(next) => marker = Some(next),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::TryStreamExt;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn it_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::default()
            .read("things", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BackendError::Unavailable("connection reset".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn it_gives_up_after_the_last_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = RetryPolicy::default()
            .read("things", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Unavailable("connection reset".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn it_does_not_retry_permanent_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = RetryPolicy::default()
            .read("things", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::NotFound("alex".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(BackendError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn it_doubles_the_delay() {
        let retry = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn it_walks_every_page() {
        let pages = [vec![1, 2], vec![3], vec![4, 5]];
        let items: Vec<i32> = paginate(RetryPolicy::never(), "numbers", |marker| {
            let index: usize = marker.map(|m| m.parse().unwrap()).unwrap_or(0);
            let page = pages[index].clone();
            async move {
                let next = (index + 1 < 3).then(|| (index + 1).to_string());
                Ok(Page::new(page, next))
            }
        })
        .try_collect()
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn it_stops_on_a_repeated_marker() {
        let result: Result<Vec<i32>, _> = paginate(RetryPolicy::never(), "numbers", |_| async {
            Ok(Page::new(vec![1], Some("same".to_string())))
        })
        .try_collect()
        .await;

        // first page has no marker, second returns "same" again
        assert!(matches!(result, Err(BackendError::Rejected { .. })));
    }
}
