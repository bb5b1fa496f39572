//! Timeout and backoff decorator for remote clients.
use std::{future::Future, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use log::warn;

use crate::{
    metadata::{FileAction, Snapshot, VersionMetadata},
    remote::{RemoteError, RemoteResult, RemoteTableClient, SnapshotSpec, TimeoutSnafu},
};

/// How remote calls are bounded and retried.
///
/// Only transient failures ([`RemoteError::is_retryable`]) are retried. A call
/// that still fails transiently after `max_retries` retries surfaces as
/// [`RemoteError::RetriesExhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// First backoff delay.
    pub min_delay: Duration,
    /// Upper bound of the backoff delay.
    pub max_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Randomize delays to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Wraps a [`RemoteTableClient`] with per-call timeouts and bounded
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: RemoteTableClient> RetryingClient<C> {
    /// Decorate `inner` with `policy`.
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// The policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let timeout = self.policy.timeout;
        let result = (|| {
            let fut = attempt();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(res) => res,
                    Err(_) => TimeoutSnafu { operation, timeout }.fail(),
                }
            }
        })
        .retry(self.policy.backoff())
        .when(RemoteError::is_retryable)
        .notify(|err, dur| {
            warn!(
                "{operation} failed: {err}. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        })
        .await;

        match result {
            Err(err) if err.is_retryable() => Err(RemoteError::RetriesExhausted {
                attempts: self.policy.max_retries + 1,
                source: Box::new(err),
            }),
            other => other,
        }
    }
}

#[async_trait]
impl<C: RemoteTableClient> RemoteTableClient for RetryingClient<C> {
    async fn latest_version(&self) -> RemoteResult<u64> {
        self.call("latest_version", || self.inner.latest_version())
            .await
    }

    async fn get_snapshot(&self, at: SnapshotSpec) -> RemoteResult<Snapshot> {
        self.call("get_snapshot", || self.inner.get_snapshot(at)).await
    }

    async fn get_metadata(&self, version: u64) -> RemoteResult<VersionMetadata> {
        self.call("get_metadata", || self.inner.get_metadata(version))
            .await
    }

    async fn resolve_version_for_timestamp(&self, timestamp: DateTime<Utc>) -> RemoteResult<u64> {
        self.call("resolve_version_for_timestamp", || {
            self.inner.resolve_version_for_timestamp(timestamp)
        })
        .await
    }

    async fn list_changes(
        &self,
        start_version: u64,
        end_version: u64,
    ) -> RemoteResult<Vec<FileAction>> {
        self.call("list_changes", || {
            self.inner.list_changes(start_version, end_version)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{LogicalDataType, LogicalField, LogicalSchema, TableId, TableMeta},
        remote::memory::MemoryTableClient,
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_retries,
            jitter: false,
        }
    }

    fn table() -> MemoryTableClient {
        let schema = LogicalSchema::new(vec![LogicalField::nullable("id", LogicalDataType::Int64)])
            .expect("valid schema");
        MemoryTableClient::create(TableMeta::new(TableId::new("t-1"), schema), Utc::now())
    }

    struct Stalled;

    #[async_trait]
    impl RemoteTableClient for Stalled {
        async fn latest_version(&self) -> RemoteResult<u64> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(0)
        }

        async fn get_snapshot(&self, _at: SnapshotSpec) -> RemoteResult<Snapshot> {
            unimplemented!("not used")
        }

        async fn resolve_version_for_timestamp(&self, _ts: DateTime<Utc>) -> RemoteResult<u64> {
            unimplemented!("not used")
        }

        async fn list_changes(&self, _start: u64, _end: u64) -> RemoteResult<Vec<FileAction>> {
            unimplemented!("not used")
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() -> TestResult {
        let client = RetryingClient::new(table(), fast_policy(3));
        client.inner().fail_next_calls(2, 503);

        assert_eq!(client.latest_version().await?, 0);
        assert_eq!(client.inner().call_counts().latest_version, 3);
        Ok(())
    }

    #[tokio::test]
    async fn persistent_failures_exhaust_retries() {
        let client = RetryingClient::new(table(), fast_policy(2));
        client.inner().fail_next_calls(10, 500);

        let err = client.latest_version().await.expect_err("should give up");
        assert!(matches!(err, RemoteError::RetriesExhausted { attempts: 3, .. }));
        assert!(matches!(err.root(), RemoteError::Server { status: 500, .. }));
        assert_eq!(client.inner().call_counts().latest_version, 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let client = RetryingClient::new(table(), fast_policy(3));

        let err = client.list_changes(5, 6).await.expect_err("missing version");
        assert!(matches!(err, RemoteError::VersionNotFound { version: 5, .. }));
        assert_eq!(client.inner().call_counts().list_changes, 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(10),
            ..fast_policy(1)
        };
        let client = RetryingClient::new(Stalled, policy);

        let err = client.latest_version().await.expect_err("should time out");
        assert!(matches!(err, RemoteError::RetriesExhausted { attempts: 2, .. }));
        assert!(matches!(err.root(), RemoteError::Timeout { .. }));
    }
}
