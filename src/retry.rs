//! Retry with backoff at the mailbox client boundary
//!
//! [`RetryingMailbox`] wraps any [`MailboxClient`] and retries transient
//! failures according to a [`RetryPolicy`], so individual call sites never
//! carry their own retry loops.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::mailbox::{AttachmentInfo, ListOptions, MailboxClient, MessageBody, MessageSummary};

/// Attempt budget and delay schedule for one mailbox call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before retry `n` is entry `n`; the last entry repeats
    pub backoff_schedule: Vec<Duration>,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` below 1 is raised to 1
    pub fn new(max_attempts: u32, backoff_schedule: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_schedule,
        }
    }

    /// Delay to wait before retry number `retry` (0-indexed)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let idx = usize::try_from(retry).unwrap_or(usize::MAX);
        self.backoff_schedule
            .get(idx)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A mailbox client wrapper that retries transient failures
pub struct RetryingMailbox<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: MailboxClient> RetryingMailbox<C> {
    /// Wrap a client with retry logic
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: MailboxClient> MailboxClient for RetryingMailbox<C> {
    async fn list_messages(
        &self,
        folder: &str,
        options: ListOptions,
    ) -> AppResult<Vec<MessageSummary>> {
        self.policy
            .run("list_messages", move || self.inner.list_messages(folder, options))
            .await
    }

    async fn get_body(&self, message_id: &str) -> AppResult<MessageBody> {
        self.policy
            .run("get_body", move || self.inner.get_body(message_id))
            .await
    }

    async fn list_attachments(&self, message_id: &str) -> AppResult<Vec<AttachmentInfo>> {
        self.policy
            .run("list_attachments", move || self.inner.list_attachments(message_id))
            .await
    }

    async fn download_attachment(&self, attachment_id: &str) -> AppResult<Vec<u8>> {
        self.policy
            .run("download_attachment", move || {
                self.inner.download_attachment(attachment_id)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{RetryPolicy, RetryingMailbox};
    use crate::errors::{AppError, AppResult};
    use crate::mailbox::{
        AttachmentInfo, ListOptions, MailboxClient, MessageBody, MessageSummary,
    };

    /// Client that fails with queued errors before succeeding
    struct FlakyClient {
        failures: Mutex<Vec<AppError>>,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(failures: Vec<AppError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicU32::new(0),
            }
        }

        fn next(&self) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().expect("lock");
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    #[async_trait]
    impl MailboxClient for FlakyClient {
        async fn list_messages(
            &self,
            _folder: &str,
            _options: ListOptions,
        ) -> AppResult<Vec<MessageSummary>> {
            self.next()?;
            Ok(vec![MessageSummary::new("m1", None)])
        }

        async fn get_body(&self, _message_id: &str) -> AppResult<MessageBody> {
            self.next()?;
            Ok(MessageBody {
                body_type: "Text".to_owned(),
                content: "hello".to_owned(),
            })
        }

        async fn list_attachments(&self, _message_id: &str) -> AppResult<Vec<AttachmentInfo>> {
            self.next()?;
            Ok(Vec::new())
        }

        async fn download_attachment(&self, _attachment_id: &str) -> AppResult<Vec<u8>> {
            self.next()?;
            Ok(b"data".to_vec())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, vec![Duration::from_millis(1)])
    }

    #[test]
    fn delay_for_repeats_last_entry() {
        let policy = RetryPolicy::new(
            5,
            vec![Duration::from_millis(10), Duration::from_millis(20)],
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(7), Duration::from_millis(20));
        assert_eq!(RetryPolicy::new(1, Vec::new()).delay_for(0), Duration::ZERO);
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Vec::new()).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let client = RetryingMailbox::new(
            FlakyClient::new(vec![
                AppError::Transport("connection reset".to_owned()),
                AppError::Timeout("FindItem".to_owned()),
            ]),
            fast_policy(3),
        );

        let messages = client
            .list_messages("inbox", ListOptions { max_results: 50 })
            .await
            .expect("third attempt succeeds");

        assert_eq!(messages.len(), 1);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = RetryingMailbox::new(
            FlakyClient::new(vec![
                AppError::Transport("503".to_owned()),
                AppError::Transport("503".to_owned()),
                AppError::Transport("503".to_owned()),
            ]),
            fast_policy(2),
        );

        let err = client
            .download_attachment("att-1")
            .await
            .expect_err("both attempts fail");

        assert!(matches!(err, AppError::Transport(_)));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let client = RetryingMailbox::new(
            FlakyClient::new(vec![AppError::AuthFailed("401".to_owned())]),
            fast_policy(5),
        );

        let err = client
            .list_attachments("msg-1")
            .await
            .expect_err("auth failure is permanent");

        assert!(matches!(err, AppError::AuthFailed(_)));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }
}
