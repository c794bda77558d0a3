//! Collaborators the retry scheduler delegates to

use async_trait::async_trait;

/// Reports whether the remote peer is currently reachable
///
/// Called once per drain cycle before the store is touched, so it should be
/// cheap and return quickly.
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    /// `true` if a resend attempt is worth making right now
    async fn is_remoting_enabled(&self) -> bool;
}

/// Resends a batch of stored payloads
///
/// The contract is all-or-nothing per batch: return `true` only if every value
/// was accepted by the remote side. On `false` the whole batch stays queued and
/// is offered again, in the same order, on the next cycle. Timeouts for the
/// underlying send are the implementation's responsibility.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use retry_spool::RetryStrategy;
///
/// struct FeedbackSender;
///
/// #[async_trait]
/// impl RetryStrategy<String> for FeedbackSender {
///     async fn retry(&self, values: &[String]) -> bool {
///         // send `values` to the remote side here
///         !values.is_empty()
///     }
/// }
/// ```
#[async_trait]
pub trait RetryStrategy<T>: Send + Sync {
    /// Attempt to resend `values`; `true` iff all were accepted
    async fn retry(&self, values: &[T]) -> bool;
}

#[async_trait]
impl<F> ConnectivityChecker for F
where
    F: Fn() -> bool + Send + Sync,
{
    async fn is_remoting_enabled(&self) -> bool {
        self()
    }
}

#[async_trait]
impl<T, F> RetryStrategy<T> for F
where
    T: Sync,
    F: Fn(&[T]) -> bool + Send + Sync,
{
    async fn retry(&self, values: &[T]) -> bool {
        self(values)
    }
}
