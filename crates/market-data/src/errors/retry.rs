/// Classification for retry policy.
///
/// Used to determine how the orchestrator should respond to errors from providers.
///
/// # Behavior Summary
///
/// | Class | Retry Same Provider? | Try Next Provider? | Health Penalty? |
/// |-------|----------------------|--------------------|-----------------|
/// | `WithBackoff` | Yes, up to `max_attempts` | Yes, once exhausted | One failure per attempt |
/// | `FailoverWithPenalty` | No | Yes | Hard failure |
/// | `NextProvider` | No | Yes | No |
/// | `Never` | No | No | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Transient failure (timeout, connection reset, throttling).
    /// Retry the same provider with exponential backoff.
    WithBackoff,

    /// The provider rejected the request outright (bad credentials, malformed
    /// request, garbage payload). Retrying won't help and the provider is
    /// demoted immediately.
    FailoverWithPenalty,

    /// This provider can't serve the request but another one might.
    /// No health penalty is recorded.
    NextProvider,

    /// The request itself is invalid or the operation is finished.
    /// Surface the error to the caller as-is.
    Never,
}

impl RetryClass {
    /// Whether the orchestrator may move on to the next provider.
    pub fn allows_failover(self) -> bool {
        !matches!(self, Self::Never)
    }
}
